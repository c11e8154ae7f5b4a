use serde::{Deserialize, Serialize};

/// Outcome of executing a transaction, as reported by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    block_number: u64,
    succeeded: bool,
    gas_used: u64,
    effective_gas_price: u128,
}

impl TransactionReceipt {
    pub fn new(block_number: u64, succeeded: bool, gas_used: u64, effective_gas_price: u128) -> Self {
        Self {
            block_number,
            succeeded,
            gas_used,
            effective_gas_price,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }
}

