use crate::backend::BackendHandle;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Fixed collection of backend handles for the gateway's lifetime.
///
/// Membership never changes after construction. Handles keep their
/// configuration order, which is also the boot order. `start_all` and
/// `stop_all` each run at most once per registry.
pub struct BackendRegistry {
    backends: Vec<Arc<BackendHandle>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl BackendRegistry {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let backends = config
            .backends
            .iter()
            .map(|spec| {
                Arc::new(BackendHandle::new(
                    spec.clone(),
                    &config.timeouts,
                    &config.gateway,
                ))
            })
            .collect();
        Self {
            backends,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<BackendHandle>> {
        self.backends.iter()
    }

    /// Lookup by logical backend name
    pub fn get(&self, backend_id: &str) -> Result<&Arc<BackendHandle>, GatewayError> {
        self.backends
            .iter()
            .find(|handle| handle.name() == backend_id)
            .ok_or_else(|| GatewayError::unknown_backend(backend_id))
    }

    /// Start every configured backend in order. A required backend's
    /// failure aborts the boot: already-started backends are stopped
    /// before the error is returned, so no process outlives a failed
    /// boot. Optional backends log their failure and stay unavailable.
    pub async fn start_all(&self) -> Result<(), GatewayError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::invocation("start_all may only run once"));
        }

        info!(backends = self.backends.len(), "Starting all backends");
        let mut ready: Vec<&Arc<BackendHandle>> = Vec::new();
        for handle in &self.backends {
            match handle.start().await {
                Ok(()) => ready.push(handle),
                Err(e) if handle.spec().required => {
                    error!(
                        backend = handle.name(),
                        error = %e,
                        "Required backend failed to start, aborting boot"
                    );
                    for started in ready {
                        if let Err(stop_err) = started.stop().await {
                            warn!(
                                backend = started.name(),
                                error = %stop_err,
                                "Cleanup stop failed during aborted boot"
                            );
                        }
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        backend = handle.name(),
                        error = %e,
                        "Optional backend failed to start, continuing without it"
                    );
                }
            }
        }

        info!(ready = ready.len(), "Backend boot complete");
        Ok(())
    }

    /// Stop every backend, continuing past individual failures. Errors
    /// are aggregated into one `Shutdown` error instead of suppressed.
    pub async fn stop_all(&self) -> Result<(), GatewayError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::invocation("stop_all may only run once"));
        }

        info!(backends = self.backends.len(), "Stopping all backends");
        let mut failures = Vec::new();
        for handle in &self.backends {
            if let Err(e) = handle.stop().await {
                warn!(backend = handle.name(), error = %e, "Backend stop failed");
                failures.push(format!("{}: {e}", handle.name()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::shutdown(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendState;
    use crate::config::{BackendSpec, GatewayConfig, TimeoutConfig};

    fn config_with(backends: Vec<BackendSpec>) -> GatewayConfig {
        GatewayConfig {
            timeouts: TimeoutConfig {
                startup_ms: 500,
                call_ms: 1_000,
                shutdown_grace_ms: 500,
            },
            backends,
            ..Default::default()
        }
    }

    fn broken_spec(name: &str, required: bool) -> BackendSpec {
        BackendSpec::builder()
            .name(name)
            .command("definitely-not-a-real-binary-13579")
            .required(required)
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_unknown_backend() {
        let registry = BackendRegistry::from_config(&config_with(vec![broken_spec("a", true)]));
        assert!(registry.get("a").is_ok());
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, GatewayError::UnknownBackend(_)));
    }

    #[tokio::test]
    async fn test_required_backend_failure_aborts_boot() {
        let registry = BackendRegistry::from_config(&config_with(vec![broken_spec("a", true)]));
        let err = registry.start_all().await.unwrap_err();
        assert!(matches!(err, GatewayError::Spawn(_)));
        assert_eq!(registry.get("a").unwrap().state(), BackendState::Failed);
    }

    #[tokio::test]
    async fn test_optional_backend_failure_tolerated() {
        let registry = BackendRegistry::from_config(&config_with(vec![broken_spec("a", false)]));
        registry.start_all().await.unwrap();
        assert_eq!(registry.get("a").unwrap().state(), BackendState::Failed);
    }

    #[tokio::test]
    async fn test_start_all_runs_at_most_once() {
        let registry = BackendRegistry::from_config(&config_with(vec![broken_spec("a", false)]));
        registry.start_all().await.unwrap();
        let err = registry.start_all().await.unwrap_err();
        assert!(matches!(err, GatewayError::Invocation(_)));
    }

    #[tokio::test]
    async fn test_stop_all_runs_at_most_once() {
        let registry = BackendRegistry::from_config(&config_with(vec![broken_spec("a", false)]));
        registry.stop_all().await.unwrap();
        let err = registry.stop_all().await.unwrap_err();
        assert!(matches!(err, GatewayError::Invocation(_)));
    }

    #[tokio::test]
    async fn test_stop_all_covers_never_started_backends() {
        let registry = BackendRegistry::from_config(&config_with(vec![
            broken_spec("a", false),
            broken_spec("b", false),
        ]));
        registry.stop_all().await.unwrap();
        assert_eq!(registry.get("a").unwrap().state(), BackendState::Stopped);
        assert_eq!(registry.get("b").unwrap().state(), BackendState::Stopped);
    }
}
