//! Operator tunables
//!
//! Every value can be set on the command line or through an `SPP_*`
//! environment variable. Defaults match the stock spp-ctl port layout and
//! the polling budgets spp workers need to come up.

use std::time::Duration;

use clap::Args;

use crate::retry::RetryConfig;

/// Default spp-ctl port for the primary switch
pub const DEFAULT_PRIMARY_PORT: u16 = 5555;

/// Default spp-ctl port for secondary workers
pub const DEFAULT_SECONDARY_PORT: u16 = 6666;

/// Default spp-ctl REST port
pub const DEFAULT_REST_PORT: u16 = 7777;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "spp-operator";

/// spp-ctl ports, shared by the service definition and every launch command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlPorts {
    /// Primary switch port
    pub primary: u16,
    /// Secondary worker port
    pub secondary: u16,
    /// REST port
    pub rest: u16,
}

impl Default for ControlPorts {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_PORT,
            secondary: DEFAULT_SECONDARY_PORT,
            rest: DEFAULT_REST_PORT,
        }
    }
}

/// Controller configuration
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// spp-ctl port the primary switch connects to
    #[arg(long, env = "SPP_PRIMARY_PORT", default_value_t = DEFAULT_PRIMARY_PORT)]
    pub primary_port: u16,

    /// spp-ctl port secondary workers connect to
    #[arg(long, env = "SPP_SECONDARY_PORT", default_value_t = DEFAULT_SECONDARY_PORT)]
    pub secondary_port: u16,

    /// spp-ctl REST port
    #[arg(long, env = "SPP_REST_PORT", default_value_t = DEFAULT_REST_PORT)]
    pub rest_port: u16,

    /// Timeout of a single REST call, in seconds
    #[arg(long, env = "SPP_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Readiness polls for the gate and the primary switch
    #[arg(long, env = "SPP_ROLE_POLL_ATTEMPTS", default_value_t = 6)]
    pub role_poll_attempts: u32,

    /// Seconds between gate/primary readiness polls
    #[arg(long, env = "SPP_ROLE_POLL_DELAY_SECS", default_value_t = 10)]
    pub role_poll_delay_secs: u64,

    /// Readiness polls per application pod
    #[arg(long, env = "SPP_APP_POLL_ATTEMPTS", default_value_t = 12)]
    pub app_poll_attempts: u32,

    /// Seconds between application readiness polls
    #[arg(long, env = "SPP_APP_POLL_DELAY_SECS", default_value_t = 5)]
    pub app_poll_delay_secs: u64,

    /// Attempts per REST mutation
    #[arg(long, env = "SPP_MUTATION_ATTEMPTS", default_value_t = 3)]
    pub mutation_attempts: u32,

    /// Seconds between REST mutation attempts
    #[arg(long, env = "SPP_MUTATION_DELAY_SECS", default_value_t = 1)]
    pub mutation_delay_secs: u64,

    /// Requeue interval while waiting for the gate or primary, in seconds
    #[arg(long, env = "SPP_REQUEUE_PENDING_SECS", default_value_t = 5)]
    pub requeue_pending_secs: u64,

    /// Requeue interval while workers converge, in seconds
    #[arg(long, env = "SPP_REQUEUE_CONVERGING_SECS", default_value_t = 10)]
    pub requeue_converging_secs: u64,

    /// Requeue interval once everything is ready, in seconds
    #[arg(long, env = "SPP_REQUEUE_READY_SECS", default_value_t = 60)]
    pub requeue_ready_secs: u64,

    /// Requeue interval after a retryable error, in seconds
    #[arg(long, env = "SPP_REQUEUE_ERROR_SECS", default_value_t = 5)]
    pub requeue_error_secs: u64,

    /// Requeue interval after a spec error, in seconds
    #[arg(long, env = "SPP_REQUEUE_INVALID_SECS", default_value_t = 300)]
    pub requeue_invalid_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            primary_port: DEFAULT_PRIMARY_PORT,
            secondary_port: DEFAULT_SECONDARY_PORT,
            rest_port: DEFAULT_REST_PORT,
            request_timeout_secs: 10,
            role_poll_attempts: 6,
            role_poll_delay_secs: 10,
            app_poll_attempts: 12,
            app_poll_delay_secs: 5,
            mutation_attempts: 3,
            mutation_delay_secs: 1,
            requeue_pending_secs: 5,
            requeue_converging_secs: 10,
            requeue_ready_secs: 60,
            requeue_error_secs: 5,
            requeue_invalid_secs: 300,
        }
    }
}

impl OperatorConfig {
    /// spp-ctl ports
    pub fn ports(&self) -> ControlPorts {
        ControlPorts {
            primary: self.primary_port,
            secondary: self.secondary_port,
            rest: self.rest_port,
        }
    }

    /// Timeout of a single REST call
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Polling budget for the gate and the primary switch
    pub fn role_poll(&self) -> RetryConfig {
        RetryConfig::new(
            self.role_poll_attempts,
            Duration::from_secs(self.role_poll_delay_secs),
        )
    }

    /// Polling budget per application pod
    pub fn app_poll(&self) -> RetryConfig {
        RetryConfig::new(
            self.app_poll_attempts,
            Duration::from_secs(self.app_poll_delay_secs),
        )
    }

    /// Retry budget per REST mutation
    pub fn mutation_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.mutation_attempts,
            Duration::from_secs(self.mutation_delay_secs),
        )
    }

    /// Requeue while waiting for the gate or primary
    pub fn requeue_pending(&self) -> Duration {
        Duration::from_secs(self.requeue_pending_secs)
    }

    /// Requeue while workers converge
    pub fn requeue_converging(&self) -> Duration {
        Duration::from_secs(self.requeue_converging_secs)
    }

    /// Requeue once ready
    pub fn requeue_ready(&self) -> Duration {
        Duration::from_secs(self.requeue_ready_secs)
    }

    /// Requeue after a retryable error
    pub fn requeue_error(&self) -> Duration {
        Duration::from_secs(self.requeue_error_secs)
    }

    /// Requeue after a spec error
    pub fn requeue_invalid(&self) -> Duration {
        Duration::from_secs(self.requeue_invalid_secs)
    }
}
