//! Configuration types.

use std::time::Duration;

/// Message dispatch engine configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of workers draining the incoming message queue.
    pub incoming_workers: usize,
    /// Number of workers sending outgoing messages.
    pub outgoing_workers: usize,
    /// How often the scanner polls the store for pending outgoing messages.
    pub scan_interval: Duration,
    /// Capacity of the incoming message queue. Producers get an error when
    /// the queue is saturated, they never block.
    pub incoming_queue_size: usize,
    /// Capacity of the outgoing message queue, filled by the scanner.
    pub outgoing_queue_size: usize,
    /// Maximum number of source ids included in an email `References` header.
    pub reference_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            incoming_workers: 10,
            outgoing_workers: 10,
            scan_interval: Duration::from_secs(30),
            incoming_queue_size: 5000,
            outgoing_queue_size: 1000,
            reference_limit: 20,
        }
    }
}

/// Automation rule engine configuration.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Number of workers draining the task queue.
    pub workers: usize,
    /// Interval between synthetic time-trigger tasks.
    pub time_trigger_interval: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            time_trigger_interval: Duration::from_secs(3600), // hourly
        }
    }
}

/// Conversation auto-assigner configuration.
#[derive(Debug, Clone)]
pub struct AssignerConfig {
    /// Interval between assignment cycles.
    pub interval: Duration,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}
