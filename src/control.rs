//! Operator signals wired into the sender's control inbox.
//!
//! SIGUSR1 asks the sender to stop waiting for the receiver quorum; SIGUSR2
//! asks for a census dump. The handlers only flip flags; a watcher thread
//! turns them into events so the protocol code never sees a signal context.

use crossbeam_channel::Sender;
use ringcast_proto::ControlEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static STOP_WAITING: AtomicBool = AtomicBool::new(false);
static DUMP_CENSUS: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigusr1(_: libc::c_int) {
    STOP_WAITING.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigusr2(_: libc::c_int) {
    DUMP_CENSUS.store(true, Ordering::SeqCst);
}

pub fn install(tx: Sender<ControlEvent>) {
    unsafe {
        libc::signal(libc::SIGUSR1, handle_sigusr1 as *const () as libc::sighandler_t);
        libc::signal(libc::SIGUSR2, handle_sigusr2 as *const () as libc::sighandler_t);
    }

    std::thread::Builder::new()
        .name("control".into())
        .spawn(move || loop {
            if STOP_WAITING.swap(false, Ordering::SeqCst)
                && tx.send(ControlEvent::StopWaiting).is_err()
            {
                break;
            }
            if DUMP_CENSUS.swap(false, Ordering::SeqCst)
                && tx.send(ControlEvent::DumpCensus).is_err()
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        })
        .ok();
}
