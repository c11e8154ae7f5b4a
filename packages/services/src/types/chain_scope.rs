use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identifier of the network a transaction belongs to, e.g. `0x1` for Ethereum mainnet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainScope(String);

#[derive(Debug, Clone)]
pub struct InvalidChainScope(String);

impl Display for InvalidChainScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid chain scope: {}", self.0)
    }
}

impl std::error::Error for InvalidChainScope {}

impl ChainScope {
    pub fn new(scope: impl Into<String>) -> Result<Self, InvalidChainScope> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(InvalidChainScope("must not be empty".to_string()));
        }

        Ok(Self(scope))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ChainScope {
    type Err = InvalidChainScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for ChainScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// Generates a fresh, process-unique id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TxId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for TxId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage key of a transaction record. Two records with the same id on different chains are
/// different records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub chain_scope: ChainScope,
    pub id: TxId,
}

impl RecordKey {
    pub fn new(chain_scope: ChainScope, id: TxId) -> Self {
        Self { chain_scope, id }
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.chain_scope, self.id)
    }
}
