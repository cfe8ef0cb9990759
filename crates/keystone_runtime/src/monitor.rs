//! Resolution metrics.
//!
//! Counters kept by the runtime and the driver, returned with every
//! compile report.

use serde::Serialize;

/// Resolution metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Driver rounds
    pub iterations: u64,
    /// Work units taken off the runnable queue
    pub units_executed: u64,
    /// Work units that finished
    pub units_completed: u64,
    /// Work units that failed with an error
    pub units_failed: u64,
    /// Times a unit went back to waiting on a newly discovered dependency
    pub reschedules: u64,
    /// Delayed variables frozen by the driver
    pub variables_frozen: u64,
    /// Of those, variables nobody was waiting on
    pub zero_waiter_freezes: u64,
    /// Instances constructed
    pub instances_created: u64,
}

impl Metrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a driver round
    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    /// Record a unit execution
    pub fn record_execution(&mut self) {
        self.units_executed += 1;
    }

    /// Record a unit completion
    pub fn record_completion(&mut self) {
        self.units_completed += 1;
    }

    /// Record a unit failure
    pub fn record_failure(&mut self) {
        self.units_failed += 1;
    }

    /// Record a reschedule
    pub fn record_reschedule(&mut self) {
        self.reschedules += 1;
    }

    /// Record a freeze
    pub fn record_freeze(&mut self, had_waiters: bool) {
        self.variables_frozen += 1;
        if !had_waiters {
            self.zero_waiter_freezes += 1;
        }
    }

    /// Record an instantiation
    pub fn record_instance(&mut self) {
        self.instances_created += 1;
    }

    /// Share of executions that had to be retried (0.0 - 1.0)
    #[must_use]
    pub fn reschedule_rate(&self) -> f64 {
        if self.units_executed == 0 {
            return 0.0;
        }
        self.reschedules as f64 / self.units_executed as f64
    }

    /// Reset metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
