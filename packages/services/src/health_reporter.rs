use metrics::HealthChecker;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    chain_connection_healthy: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.chain_connection_healthy
    }
}

pub struct HealthReporter {
    chain_connection: HealthChecker,
}

impl HealthReporter {
    #[must_use]
    pub fn new(chain_health_check: HealthChecker) -> Self {
        Self {
            chain_connection: chain_health_check,
        }
    }

    #[must_use]
    pub fn generate_report(&self) -> HealthReport {
        HealthReport {
            chain_connection_healthy: self.chain_connection.healthy(),
        }
    }
}
