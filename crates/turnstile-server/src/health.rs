//! Liveness and readiness reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use turnstile_store::SnapshotStore;

/// Liveness of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving.
    Healthy,
    /// Not serving.
    Unhealthy,
}

impl HealthStatus {
    /// Check if the status indicates the service is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Whether checks should be routed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    /// Ready to authorize requests.
    Ready,
    /// Not ready.
    NotReady,
}

impl ReadinessStatus {
    /// Check if the service is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Liveness response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status.
    pub status: HealthStatus,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Version information.
    pub version: String,
}

/// Readiness response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status.
    pub status: ReadinessStatus,
    /// Individual check results.
    pub checks: Vec<CheckResult>,
}

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Optional message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }

    /// Set the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Tracks process health.
///
/// Ready once the first virtual-host snapshot has loaded, until shutdown
/// begins.
#[derive(Debug)]
pub struct HealthChecker {
    start_time: Instant,
    snapshots: Arc<SnapshotStore>,
    draining: AtomicBool,
}

impl HealthChecker {
    /// Create a health checker watching `snapshots`.
    pub fn new(snapshots: Arc<SnapshotStore>) -> Self {
        Self {
            start_time: Instant::now(),
            snapshots,
            draining: AtomicBool::new(false),
        }
    }

    /// Mark the service as shutting down.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Returns `true` when readiness passes.
    pub fn is_ready(&self) -> bool {
        self.readiness().status.is_ready()
    }

    /// Get the uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Perform a liveness check.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            uptime_seconds: self.uptime().as_secs(),
            version: crate::VERSION.to_string(),
        }
    }

    /// Perform a readiness check.
    pub fn readiness(&self) -> ReadinessResponse {
        let snapshot = if self.snapshots.is_loaded() {
            let loaded = self.snapshots.load();
            CheckResult::pass("snapshot").with_message(format!(
                "generation {}, {} virtual hosts",
                self.snapshots.generation(),
                loaded.len()
            ))
        } else {
            CheckResult::fail("snapshot", "virtual hosts not loaded yet")
        };

        let shutdown = if self.draining.load(Ordering::SeqCst) {
            CheckResult::fail("shutdown", "shutting down")
        } else {
            CheckResult::pass("shutdown")
        };

        let checks = vec![snapshot, shutdown];
        let status = if checks.iter().all(|c| c.passed) {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::NotReady
        };

        ReadinessResponse { status, checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::VirtualHost;

    #[test]
    fn test_statuses() {
        assert!(HealthStatus::Healthy.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert!(ReadinessStatus::Ready.is_ready());
        assert!(!ReadinessStatus::NotReady.is_ready());
    }

    #[test]
    fn test_not_ready_until_snapshot_loads() {
        let snapshots = Arc::new(SnapshotStore::new());
        let checker = HealthChecker::new(snapshots.clone());

        let readiness = checker.readiness();
        assert_eq!(readiness.status, ReadinessStatus::NotReady);
        assert_eq!(
            readiness.checks[0],
            CheckResult::fail("snapshot", "virtual hosts not loaded yet")
        );

        snapshots.replace(turnstile_store::VirtualHostSnapshot::new(vec![
            VirtualHost::default(),
        ]));
        let readiness = checker.readiness();
        assert!(readiness.status.is_ready());
        assert_eq!(
            readiness.checks[0].message.as_deref(),
            Some("generation 1, 1 virtual hosts")
        );
    }

    #[test]
    fn test_draining_is_not_ready() {
        let checker = HealthChecker::new(Arc::new(SnapshotStore::with_virtual_hosts(vec![])));
        assert!(checker.is_ready());

        checker.set_draining();
        assert!(!checker.is_ready());
        assert_eq!(checker.liveness().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_response_serialization() {
        let checker = HealthChecker::new(Arc::new(SnapshotStore::new()));

        let json = serde_json::to_string(&checker.readiness()).unwrap();
        assert!(json.contains("\"not_ready\""));
        assert!(json.contains("\"snapshot\""));

        let json = serde_json::to_string(&checker.liveness()).unwrap();
        assert!(json.contains("\"healthy\""));
    }
}
