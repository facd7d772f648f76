//! Signal-driven shutdown, matching `casparian`'s own
//! `signal_hook::iterator::Signals` background-thread pattern rather than
//! raw `sigaction` handlers: a watcher thread observes the signal and wakes
//! the event loop through the same pipe outbound responses use, which is
//! `mio`-pollable and therefore doesn't need the handler itself to be
//! async-signal-safe.

use std::sync::Arc;

use signal_hook::consts::{SIGCHLD, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use vireo_logging::Logger;

use crate::server::{ServerState, WakePipe};

/// Spawns the signal-watching thread, matching spec.md §4.9's per-signal
/// policy: INT requests a graceful shutdown the first time and forces an
/// immediate exit on a second INT; TERM forces an immediate exit right
/// away; CHLD non-blockingly reaps zombies and otherwise changes nothing.
/// Returns the handle so callers who care about process exit can join it,
/// though in practice the process is torn down around the same time the
/// server itself stops.
pub fn spawn_shutdown_watcher(wake: WakePipe, state: Arc<ServerState>, logger: Arc<Logger>) -> std::io::Result<std::thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGCHLD])?;
    Ok(std::thread::Builder::new()
        .name("vireo-signals".to_string())
        .spawn(move || {
            let mut int_already_seen = false;
            for sig in signals.forever() {
                match sig {
                    SIGCHLD => reap_any_exited_children(),
                    SIGINT if int_already_seen => {
                        logger.fatal("second SIGINT received, forcing immediate exit");
                        std::process::exit(1);
                    }
                    SIGINT => {
                        int_already_seen = true;
                        logger.info("received SIGINT, initiating graceful shutdown");
                        state.request_shutdown();
                        wake.notify_shutdown();
                    }
                    SIGTERM => {
                        logger.fatal("received SIGTERM, forcing immediate shutdown");
                        state.request_shutdown();
                        wake.notify_shutdown();
                        std::process::exit(0);
                    }
                    _ => {}
                }
            }
        })
        .expect("failed to spawn signal watcher thread"))
}

/// Reaps any exited direct children without blocking. The server itself
/// never forks workers as OS processes (workers are threads), but a SIGCHLD
/// can still arrive from whatever else runs in this process group, and an
/// unreaped zombie is a leak regardless of who spawned it.
pub fn reap_any_exited_children() {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
    }
}
