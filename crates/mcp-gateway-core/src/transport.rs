use crate::config::BackendSpec;
use crate::error::GatewayError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Framed stdio channel to one backend child process.
///
/// The child's stdin/stdout pair is the protocol wire; its stderr stays
/// attached to the gateway's stderr as a diagnostic side channel and is
/// never parsed. The `Child` is owned here, separately from the wire:
/// dropping or closing the io pair does not terminate the process, only
/// [`ChannelTransport::terminate`] does.
#[derive(Debug)]
pub struct ChannelTransport {
    child: Child,
    io: Option<(ChildStdout, ChildStdin)>,
}

impl ChannelTransport {
    /// Spawn the configured backend process with piped protocol stdio.
    /// Environment entries are applied on top of the inherited
    /// environment; on Unix the child gets its own process group so
    /// teardown can sweep grandchildren.
    pub fn open(spec: &BackendSpec) -> Result<Self, GatewayError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);

        if let Some(workdir) = &spec.working_directory {
            cmd.current_dir(workdir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::spawn(format!("{}: {e}", spec.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::spawn("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::spawn("child stdout was not captured"))?;

        info!(
            backend = %spec.name,
            command = %spec.command,
            args = ?spec.args,
            working_directory = ?spec.working_directory,
            pid = ?child.id(),
            "Backend process started"
        );

        Ok(Self {
            child,
            io: Some((stdout, stdin)),
        })
    }

    /// Take the read/write pair for the protocol service loop. Yields
    /// once; the service loop becomes the sole reader and writer of the
    /// wire, which keeps writes serialized per channel.
    pub fn take_io(&mut self) -> Option<(ChildStdout, ChildStdin)> {
        self.io.take()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the child: graceful signal first, bounded wait, then
    /// forced kill. Safe to call when the process has already exited.
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), GatewayError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(?status, "Backend process already exited");
            return Ok(());
        }

        #[cfg(unix)]
        {
            self.terminate_unix(grace).await
        }

        #[cfg(not(unix))]
        {
            let _ = grace;
            self.child
                .kill()
                .await
                .map_err(|e| GatewayError::transport(format!("failed to kill backend: {e}")))
        }
    }

    #[cfg(unix)]
    async fn terminate_unix(&mut self, grace: Duration) -> Result<(), GatewayError> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        // process_group(0) at spawn makes the child its own group leader
        let group = Pid::from_raw(pid as i32);

        match signal::killpg(group, Signal::SIGTERM) {
            Ok(()) => info!(pid, "Sent SIGTERM to backend process group"),
            Err(nix::errno::Errno::ESRCH) => {
                info!(pid, "Backend process group already gone");
            }
            Err(e) => warn!(pid, error = %e, "Failed to send SIGTERM to backend"),
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, ?status, "Backend process exited after SIGTERM");
                // sweep group members that outlived the leader
                let _ = signal::killpg(group, Signal::SIGKILL);
                Ok(())
            }
            Ok(Err(e)) => Err(GatewayError::transport(format!(
                "wait after SIGTERM failed: {e}"
            ))),
            Err(_) => {
                warn!(pid, "Backend ignored SIGTERM, escalating to SIGKILL");
                let _ = signal::killpg(group, Signal::SIGKILL);
                self.child
                    .kill()
                    .await
                    .map_err(|e| GatewayError::transport(format!("failed to kill backend: {e}")))
            }
        }
    }
}
