pub use alloy::primitives::Address;
pub use chrono::{DateTime, Utc};

mod chain_scope;
mod receipt;
mod transaction;

pub use chain_scope::*;
pub use receipt::*;
pub use transaction::*;

pub type TxHash = [u8; 32];
