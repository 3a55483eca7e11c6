//! Execution orchestrator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds on attempts, deadlines and abandoned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum provider attempts per request, even if more candidates remain
    pub max_attempts: u32,
    /// Deadline for a single provider call
    pub attempt_timeout_ms: u64,
    /// Deadline for the whole request as seen by the caller
    pub request_timeout_ms: u64,
    /// How long a timed-out call may still complete and update health/cache
    pub late_completion_grace_ms: u64,
    /// How long a flight survives after its last waiter leaves (0 = cancel at once)
    pub abandoned_flight_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
            late_completion_grace_ms: 30_000,
            abandoned_flight_grace_ms: 5_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn late_completion_grace(&self) -> Duration {
        Duration::from_millis(self.late_completion_grace_ms)
    }

    /// Outer bound for a single upstream call, covering the attempt and the
    /// window in which a late completion is still recorded.
    pub fn call_deadline(&self) -> Duration {
        self.attempt_timeout() + self.late_completion_grace()
    }

    pub fn abandoned_flight_grace(&self) -> Duration {
        Duration::from_millis(self.abandoned_flight_grace_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.attempt_timeout_ms == 0 {
            return Err("attempt_timeout_ms must be greater than 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
