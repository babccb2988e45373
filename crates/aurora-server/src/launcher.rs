//! Engine process launching.
//!
//! Translates one [`ForwardRule`] into the external forwarding engine's
//! command line, spawns the engine, and owns the child handle until the
//! supervisor asks for it to be stopped.

use async_trait::async_trait;
use aurora_core::{AuroraError, AuroraResult, ForwardRule};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Build the engine's argument vector for one rule.
///
/// Pure; [`GostLauncher::start`] passes the result to the engine binary
/// verbatim, and the supervisor compares it to decide whether an edit
/// requires a restart.
pub fn build_args(rule: &ForwardRule) -> Vec<String> {
    vec!["-L".to_string(), listen_spec(rule)]
}

/// The `-L` listen/forward specification string for one rule.
///
/// Relay-style protocols encode listener and destination; proxy-style
/// protocols encode the listener only, with `username:password@` embedded
/// when both credentials are present.
fn listen_spec(rule: &ForwardRule) -> String {
    if rule.protocol.is_proxy_style() {
        match (rule.username.as_deref(), rule.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                format!("{}://{}:{}@:{}", rule.protocol, user, pass, rule.local_port)
            }
            _ => format!("{}://:{}", rule.protocol, rule.local_port),
        }
    } else {
        format!(
            "{}://:{}/{}:{}",
            rule.protocol, rule.local_port, rule.remote_ip, rule.remote_port
        )
    }
}

/// Handle to one spawned engine instance.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS pid, when the process is real and still attached.
    fn id(&self) -> Option<u32>;

    /// Stop the process: graceful request first, forced kill once the grace
    /// period elapses. Idempotent — stopping an already-dead process is a
    /// no-op.
    async fn stop(&mut self);
}

/// Spawns engine processes for rules.
///
/// The supervisor only sees this trait, so tests substitute a fake that
/// never touches the OS.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn start(&self, rule: &ForwardRule) -> AuroraResult<Box<dyn ProcessHandle>>;
}

/// Production launcher for the gost forwarding engine.
pub struct GostLauncher {
    binary: PathBuf,
    stop_grace: Duration,
}

impl GostLauncher {
    pub fn new(binary: impl Into<PathBuf>, stop_grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            stop_grace,
        }
    }
}

#[async_trait]
impl Launcher for GostLauncher {
    async fn start(&self, rule: &ForwardRule) -> AuroraResult<Box<dyn ProcessHandle>> {
        let args = build_args(rule);
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AuroraError::Launch(format!("{}: {e}", self.binary.display())))?;

        info!(rule_id = rule.id, pid = ?child.id(), spec = %args[1], "engine started");

        Ok(Box::new(GostProcess {
            child,
            stop_grace: self.stop_grace,
        }))
    }
}

/// A live gost child process.
struct GostProcess {
    child: Child,
    stop_grace: Duration,
}

#[async_trait]
impl ProcessHandle for GostProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn stop(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(status = %status, "engine already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "could not poll engine state");
            }
        }

        let pid = self.child.id();

        #[cfg(unix)]
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match timeout(self.stop_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?pid, status = %status, "engine stopped");
            }
            Ok(Err(e)) => {
                warn!(pid = ?pid, error = %e, "wait for engine failed");
            }
            Err(_) => {
                let err = AuroraError::StopTimeout(pid.unwrap_or(0));
                warn!(pid = ?pid, error = %err, "escalating to kill");
                let _ = self.child.kill().await;
            }
        }
    }
}
