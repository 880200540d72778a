use std::io;

use futures::StreamExt;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::runtime::{SharedState, SupervisorState};

/// Signals that stop supervision and are passed on to the child.
pub const FORWARDED: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/*
    @@@
    @listen();
    . Installs handlers for the termination signals and spawns the task that reacts to them.
    . Each signal marks the supervisor as stopping, then forwards the same signal to the running child.
*/
pub fn listen(state: SharedState) -> io::Result<JoinHandle<()>> {
    let signals = Signals::new(FORWARDED)?;
    Ok(tokio::spawn(forward_signals(signals, state)))
}

async fn forward_signals(mut signals: Signals, state: SharedState) {
    while let Some(signo) = signals.next().await {
        info!(signal = signo, "termination signal received, not restarting");
        state.request_stop();
        forward(&state, signo);
    }
}

/// Sends `signo` to the current child. Returns whether a child was signalled.
pub fn forward(state: &SupervisorState, signo: i32) -> bool {
    let Some(pid) = state.current_pid() else {
        return false;
    };
    let sig = match Signal::try_from(signo) {
        Ok(sig) => sig,
        Err(e) => {
            error!(signal = signo, error = %e, "cannot forward unknown signal");
            return false;
        }
    };
    match kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => {
            info!(pid, signal = ?sig, "forwarded signal to child");
            true
        }
        Err(e) => {
            error!(pid, signal = ?sig, error = %e, "failed to forward signal");
            false
        }
    }
}
