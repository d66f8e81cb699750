use crate::config::{BackendSpec, GatewayInfo, TimeoutConfig};
use crate::error::GatewayError;
use crate::normalize::{self, NormalizedResult, ResultKind};
use crate::transport::ChannelTransport;
use rmcp::model::{
    CallToolRequestParam, ClientInfo, InitializeRequestParam, JsonObject, ListToolsResult,
    ServerInfo,
};
use rmcp::service::{Peer, RunningService};
use rmcp::{RoleClient, ServiceExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Lifecycle states of one backend handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// Owns one backend child process and its protocol channel, and mediates
/// every call to it. `Ready` guarantees the child is alive and the
/// handshake completed. The handle survives mid-session channel failures
/// in the `Failed` state so `stop` can still run full cleanup.
#[derive(Debug)]
pub struct BackendHandle {
    spec: BackendSpec,
    timeouts: TimeoutConfig,
    client_name: String,
    client_version: String,
    state: std::sync::RwLock<BackendState>,
    pid: std::sync::RwLock<Option<u32>>,
    service: RwLock<Option<RunningService<RoleClient, InitializeRequestParam>>>,
    transport: Mutex<Option<ChannelTransport>>,
}

impl BackendHandle {
    pub fn new(spec: BackendSpec, timeouts: &TimeoutConfig, identity: &GatewayInfo) -> Self {
        Self {
            spec,
            timeouts: timeouts.clone(),
            client_name: identity.name.clone(),
            client_version: identity.version.clone(),
            state: std::sync::RwLock::new(BackendState::Uninitialized),
            pid: std::sync::RwLock::new(None),
            service: RwLock::new(None),
            transport: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn state(&self) -> BackendState {
        *self.state.read().unwrap()
    }

    /// Pid of the child process, kept past shutdown for diagnostics
    pub fn pid(&self) -> Option<u32> {
        *self.pid.read().unwrap()
    }

    /// Server info the backend advertised during handshake
    pub async fn peer_info(&self) -> Option<ServerInfo> {
        match &*self.service.read().await {
            Some(service) => service.peer_info().cloned(),
            None => None,
        }
    }

    /// Spawn the backend process and run the protocol handshake, moving
    /// `Uninitialized -> Starting -> Ready`. On any failure the handle
    /// lands in `Failed` with the child already torn down.
    pub async fn start(&self) -> Result<(), GatewayError> {
        self.transition(BackendState::Uninitialized, BackendState::Starting)?;

        let mut transport = match ChannelTransport::open(&self.spec) {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(BackendState::Failed);
                return Err(e);
            }
        };
        *self.pid.write().unwrap() = transport.pid();

        let Some(io) = transport.take_io() else {
            self.set_state(BackendState::Failed);
            return Err(GatewayError::startup("transport io pair already taken"));
        };

        let client_info = self.client_info();
        match tokio::time::timeout(self.timeouts.startup(), client_info.serve(io)).await {
            Ok(Ok(service)) => {
                if let Some(info) = service.peer_info() {
                    info!(
                        backend = %self.spec.name,
                        server = %info.server_info.name,
                        server_version = %info.server_info.version,
                        "Backend handshake complete"
                    );
                }
                *self.service.write().await = Some(service);
                *self.transport.lock().await = Some(transport);
                self.set_state(BackendState::Ready);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(backend = %self.spec.name, error = %e, "Backend handshake failed");
                let _ = transport.terminate(self.timeouts.shutdown_grace()).await;
                self.set_state(BackendState::Failed);
                Err(GatewayError::startup(format!("{}: {e}", self.spec.name)))
            }
            Err(_) => {
                warn!(backend = %self.spec.name, "Backend handshake timed out");
                let _ = transport.terminate(self.timeouts.shutdown_grace()).await;
                self.set_state(BackendState::Failed);
                Err(GatewayError::startup(format!(
                    "{}: handshake timed out after {:?}",
                    self.spec.name,
                    self.timeouts.startup()
                )))
            }
        }
    }

    /// Call one backend tool and normalize the reply. Only valid in
    /// `Ready`. Concurrent invokes overlap freely: the protocol service
    /// correlates replies by request id, and each call resolves exactly
    /// once with a value, a typed error, or a timeout.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
        expected: ResultKind,
    ) -> Result<NormalizedResult, GatewayError> {
        let peer = self.ready_peer().await?;

        let request = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments,
        };

        debug!(backend = %self.spec.name, tool, "Forwarding tool call");
        match tokio::time::timeout(self.timeouts.call(), peer.call_tool(request)).await {
            Ok(Ok(reply)) => {
                if reply.is_error == Some(true) {
                    let message = reply
                        .content
                        .iter()
                        .find_map(|part| part.as_text())
                        .map(|text| text.text.clone())
                        .unwrap_or_else(|| format!("tool '{tool}' failed"));
                    return Err(GatewayError::backend(message));
                }
                Ok(normalize::normalize(&reply, expected))
            }
            Ok(Err(e)) => Err(self.map_service_error(tool, e)),
            Err(_) => Err(GatewayError::timeout(format!(
                "call to '{tool}' on backend '{}' exceeded {:?}",
                self.spec.name,
                self.timeouts.call()
            ))),
        }
    }

    /// List the tools the backend advertises. Only valid in `Ready`.
    pub async fn list_tools(&self) -> Result<ListToolsResult, GatewayError> {
        let peer = self.ready_peer().await?;
        match tokio::time::timeout(self.timeouts.call(), peer.list_tools(None)).await {
            Ok(Ok(tools)) => Ok(tools),
            Ok(Err(e)) => Err(self.map_service_error("tools/list", e)),
            Err(_) => Err(GatewayError::timeout(format!(
                "tools/list on backend '{}' exceeded {:?}",
                self.spec.name,
                self.timeouts.call()
            ))),
        }
    }

    /// Clone the peer out of the lock so in-flight calls never block
    /// stop() from taking the service.
    async fn ready_peer(&self) -> Result<Peer<RoleClient>, GatewayError> {
        let state = self.state();
        if state != BackendState::Ready {
            return Err(GatewayError::invocation(format!(
                "backend '{}' is {state:?}, not Ready",
                self.spec.name
            )));
        }

        let guard = self.service.read().await;
        match guard.as_ref() {
            Some(service) => Ok(service.peer().clone()),
            None => Err(GatewayError::invocation(format!(
                "backend '{}' has no live service",
                self.spec.name
            ))),
        }
    }

    /// Idempotent graceful shutdown: cancel the protocol service (closes
    /// the channel), then terminate the child, ending in `Stopped` from
    /// any prior state. A no-op when already `Stopped`.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        {
            let mut state = self.state.write().unwrap();
            if *state == BackendState::Stopped {
                return Ok(());
            }
            *state = BackendState::Stopping;
        }
        info!(backend = %self.spec.name, "Stopping backend");

        if let Some(service) = self.service.write().await.take() {
            match service.cancel().await {
                Ok(_) => debug!(backend = %self.spec.name, "Backend service cancelled"),
                Err(e) => {
                    error!(backend = %self.spec.name, error = %e, "Failed to cancel backend service")
                }
            }
        }

        let result = match self.transport.lock().await.take() {
            Some(mut transport) => transport.terminate(self.timeouts.shutdown_grace()).await,
            None => Ok(()),
        };

        self.set_state(BackendState::Stopped);
        info!(backend = %self.spec.name, "Backend stopped");
        result
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: rmcp::model::ClientCapabilities::default(),
            client_info: rmcp::model::Implementation {
                name: self.client_name.clone(),
                version: self.client_version.clone(),
            },
        }
    }

    /// Classify a protocol service failure. Application errors stay
    /// call-local; transport-category failures poison the handle.
    fn map_service_error(&self, tool: &str, e: rmcp::ServiceError) -> GatewayError {
        use rmcp::ServiceError;

        let mapped = match e {
            ServiceError::McpError(data) => {
                GatewayError::backend(format!("{tool}: {}", data.message))
            }
            ServiceError::Timeout { .. } => {
                GatewayError::timeout(format!("call to '{tool}' timed out"))
            }
            ServiceError::Cancelled { .. } => {
                GatewayError::channel_closed(format!("call to '{tool}' was cancelled"))
            }
            other => GatewayError::channel_closed(format!("{tool}: {other}")),
        };

        if mapped.is_fatal_to_backend() {
            self.mark_failed();
        }
        mapped
    }

    /// Failed is only reachable from Starting or Ready; shutdown states
    /// are never clobbered by late I/O errors.
    fn mark_failed(&self) {
        let mut state = self.state.write().unwrap();
        if matches!(*state, BackendState::Starting | BackendState::Ready) {
            warn!(backend = %self.spec.name, "Backend channel failed, marking unavailable");
            *state = BackendState::Failed;
        }
    }

    fn transition(&self, from: BackendState, to: BackendState) -> Result<(), GatewayError> {
        let mut state = self.state.write().unwrap();
        if *state != from {
            return Err(GatewayError::invocation(format!(
                "backend '{}' is {:?}, expected {from:?}",
                self.spec.name, *state
            )));
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: BackendState) {
        let mut state = self.state.write().unwrap();
        debug!(backend = %self.spec.name, from = ?*state, to = ?to, "State transition");
        *state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for(command: &str) -> BackendHandle {
        let spec = BackendSpec::builder()
            .name("test-backend")
            .command(command)
            .build()
            .unwrap();
        BackendHandle::new(spec, &TimeoutConfig::default(), &GatewayInfo::default())
    }

    #[tokio::test]
    async fn test_invoke_requires_ready() {
        let handle = handle_for("true");
        let err = handle
            .invoke("anything", None, ResultKind::Number)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Invocation(_)));
        assert_eq!(handle.state(), BackendState::Uninitialized);
    }

    #[tokio::test]
    async fn test_start_with_missing_executable_fails() {
        let handle = handle_for("definitely-not-a-real-binary-98765");
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Spawn(_)));
        assert_eq!(handle.state(), BackendState::Failed);

        // Failed handles still stop cleanly
        handle.stop().await.unwrap();
        assert_eq!(handle.state(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let handle = handle_for("definitely-not-a-real-binary-98765");
        let _ = handle.start().await;
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Invocation(_)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_from_any_state() {
        let handle = handle_for("true");
        assert_eq!(handle.state(), BackendState::Uninitialized);
        handle.stop().await.unwrap();
        assert_eq!(handle.state(), BackendState::Stopped);
        handle.stop().await.unwrap();
        assert_eq!(handle.state(), BackendState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_with_non_protocol_child_fails_startup() {
        // `sleep` accepts the spawn but never speaks the protocol, so the
        // bounded handshake must fail and reap the child.
        let spec = BackendSpec::builder()
            .name("mute")
            .command("sleep")
            .args(["30"])
            .build()
            .unwrap();
        let timeouts = TimeoutConfig {
            startup_ms: 500,
            call_ms: 1_000,
            shutdown_grace_ms: 500,
        };
        let handle = BackendHandle::new(spec, &timeouts, &GatewayInfo::default());

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Startup(_)));
        assert_eq!(handle.state(), BackendState::Failed);

        let pid = handle.pid().unwrap();
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
        assert!(!alive);
    }
}
