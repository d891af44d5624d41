//! Graceful child termination.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;

/// Ask the child to exit, wait up to `grace`, then kill it.
///
/// A child that has already exited is reaped and its status returned.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if request_exit(child)? {
        if let Ok(result) = timeout(grace, child.wait()).await {
            return result;
        }
        tracing::warn!(
            pid = ?child.id(),
            grace_ms = grace.as_millis() as u64,
            "Child ignored termination signal, killing"
        );
    }

    // Child::kill sends SIGKILL on unix and reaps the child.
    child.kill().await?;
    child.wait().await
}

/// Send SIGTERM. Returns false when the signal could not be delivered.
#[cfg(unix)]
fn request_exit(child: &Child) -> io::Result<bool> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(false);
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(e) => Err(io::Error::other(e)),
    }
}

/// No graceful signal on this platform; go straight to kill.
#[cfg(not(unix))]
fn request_exit(_child: &Child) -> io::Result<bool> {
    Ok(false)
}
