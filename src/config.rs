use std::time::Duration;

/// Name of the single queue shared by the gateway and the applier.
pub const DEFAULT_QUEUE_NAME: &str = "transactions_queue";

/// Response-latency bound for approving a `withdraw_request`.
pub const DEFAULT_WITHDRAW_BUDGET: Duration = Duration::from_secs(3);

/// Deliveries allowed per message before it is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Runtime settings shared by the pipeline components.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub queue_name: String,
    /// Measured from the balance read to after both publishes. Exceeding it
    /// changes the response only; published messages are not withdrawn.
    pub withdraw_budget: Duration,
    pub max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            withdraw_budget: DEFAULT_WITHDRAW_BUDGET,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PipelineConfig {
    pub fn with_withdraw_budget(mut self, budget: Duration) -> Self {
        self.withdraw_budget = budget;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_name, "transactions_queue");
        assert_eq!(config.withdraw_budget, Duration::from_secs(3));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_max_attempts_is_at_least_one() {
        let config = PipelineConfig::default().with_max_attempts(0);
        assert_eq!(config.max_attempts, 1);
    }
}
