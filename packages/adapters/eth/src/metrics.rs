use metrics::{
    RegistersMetrics,
    prometheus::{IntCounterVec, Opts, core::Collector},
};

#[derive(Clone)]
pub struct Metrics {
    pub(crate) eth_network_errors: IntCounterVec,
}

impl RegistersMetrics for Metrics {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        vec![Box::new(self.eth_network_errors.clone())]
    }
}

impl Default for Metrics {
    fn default() -> Self {
        let eth_network_errors = IntCounterVec::new(
            Opts::new(
                "eth_network_errors",
                "Number of network errors encountered while talking to the Ethereum node.",
            ),
            &["method"],
        )
        .expect("eth_network_errors metric to be correctly configured");

        Self { eth_network_errors }
    }
}
