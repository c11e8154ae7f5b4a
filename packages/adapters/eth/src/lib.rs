mod error;
mod health_tracking_middleware;
mod http;
mod metrics;

pub use alloy::primitives::Address;
pub use error::{Error, Result};
pub use health_tracking_middleware::{EthApi, HealthTrackingMiddleware};
pub use http::HttpClient;
