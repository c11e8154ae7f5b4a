use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::{Address, ChainScope, DateTime, RecordKey, TransactionReceipt, TxHash, TxId, Utc};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Unapproved,
    Submitted,
    Confirmed,
    Dropped,
}

impl TransactionStatus {
    /// Whether a record in `self` may be rewritten with status `next`. Rewriting with the same
    /// status is an update, not a transition.
    pub fn can_become(&self, next: Self) -> bool {
        use TransactionStatus::*;

        *self == next
            || matches!(
                (self, next),
                (Unapproved, Submitted) | (Submitted, Confirmed) | (Submitted, Dropped)
            )
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unapproved => "unapproved",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// Transaction bytes as produced by the signing layer. Opaque to the tracker apart from whether
/// they were signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "bytes", rename_all = "snake_case")]
pub enum Payload {
    Unsigned(#[serde(with = "hex::serde")] Vec<u8>),
    Signed(#[serde(with = "hex::serde")] Vec<u8>),
}

impl Payload {
    /// Bytes ready for broadcasting, if the payload was signed.
    pub fn signed_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Signed(bytes) => Some(bytes),
            Self::Unsigned(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxId,
    pub chain_scope: ChainScope,
    pub from: Address,
    pub nonce: Option<u64>,
    pub status: TransactionStatus,
    #[serde(with = "option_hash")]
    pub tx_hash: Option<TxHash>,
    pub payload: Payload,
    pub receipt: Option<TransactionReceipt>,
    pub created_time: DateTime<Utc>,
    pub submitted_time: Option<DateTime<Utc>>,
    pub confirmed_time: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// A fresh `Unapproved` record with a newly generated id.
    pub fn new(
        chain_scope: ChainScope,
        from: Address,
        payload: Payload,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TxId::generate(),
            chain_scope,
            from,
            nonce: None,
            status: TransactionStatus::Unapproved,
            tx_hash: None,
            payload,
            receipt: None,
            created_time,
            submitted_time: None,
            confirmed_time: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.chain_scope.clone(), self.id.clone())
    }

    pub fn hash_hex(&self) -> String {
        self.tx_hash.map(hex::encode).unwrap_or_default()
    }

    /// `Unapproved -> Submitted`. A nonce assigned while still unapproved must match.
    pub fn submitted(
        mut self,
        nonce: u64,
        tx_hash: TxHash,
        payload: Payload,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        self.expect_status(TransactionStatus::Unapproved, TransactionStatus::Submitted)?;
        if self.nonce.is_some_and(|assigned| assigned != nonce) {
            return Err(Error::InvariantViolation(format!(
                "transaction {} already has nonce {:?}, cannot submit with nonce {nonce}",
                self.id, self.nonce
            )));
        }

        self.nonce = Some(nonce);
        self.tx_hash = Some(tx_hash);
        self.payload = payload;
        self.submitted_time = Some(at);
        self.status = TransactionStatus::Submitted;

        Ok(self)
    }

    /// `Submitted -> Confirmed`. Only a successful execution confirms a transaction.
    pub fn confirmed(mut self, receipt: TransactionReceipt, at: DateTime<Utc>) -> Result<Self> {
        self.expect_status(TransactionStatus::Submitted, TransactionStatus::Confirmed)?;
        if !receipt.succeeded() {
            return Err(Error::InvariantViolation(format!(
                "transaction {} cannot be confirmed by a failed receipt",
                self.id
            )));
        }

        self.receipt = Some(receipt);
        self.confirmed_time = Some(at);
        self.status = TransactionStatus::Confirmed;

        Ok(self)
    }

    /// `Submitted -> Dropped`.
    pub fn dropped(mut self) -> Result<Self> {
        self.expect_status(TransactionStatus::Submitted, TransactionStatus::Dropped)?;
        self.status = TransactionStatus::Dropped;

        Ok(self)
    }

    fn expect_status(&self, expected: TransactionStatus, next: TransactionStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvariantViolation(format!(
                "transaction {} cannot move from {} to {next}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Checks that the fields required by the current status are present and that timestamps
    /// do not go backwards.
    pub fn validate(&self) -> Result<()> {
        let violation = |what: &str| {
            Err(Error::InvariantViolation(format!(
                "{} transaction {} {what}",
                self.status, self.id
            )))
        };

        let reached_submission = self.status != TransactionStatus::Unapproved;
        let reached_confirmation = self.status == TransactionStatus::Confirmed;

        if reached_submission {
            if self.nonce.is_none() {
                return violation("has no nonce");
            }
            if self.tx_hash.is_none() {
                return violation("has no tx hash");
            }
            if self.submitted_time.is_none() {
                return violation("has no submission time");
            }
        } else if self.tx_hash.is_some() || self.submitted_time.is_some() {
            return violation("carries submission data");
        }

        if reached_confirmation {
            match self.receipt {
                Some(receipt) if receipt.succeeded() => {}
                Some(_) => return violation("has a failed receipt"),
                None => return violation("has no receipt"),
            }
            if self.confirmed_time.is_none() {
                return violation("has no confirmation time");
            }
        } else if self.receipt.is_some() || self.confirmed_time.is_some() {
            return violation("carries confirmation data");
        }

        if self
            .submitted_time
            .is_some_and(|submitted| submitted < self.created_time)
        {
            return violation("was submitted before it was created");
        }
        if let (Some(submitted), Some(confirmed)) = (self.submitted_time, self.confirmed_time) {
            if confirmed < submitted {
                return violation("was confirmed before it was submitted");
            }
        }

        Ok(())
    }

    /// Checks that `next` is a legal rewrite of `self`: the status moves forward and fields that
    /// are set once stay as they were.
    pub fn validate_successor(&self, next: &Self) -> Result<()> {
        if !self.status.can_become(next.status) {
            return Err(Error::InvariantViolation(format!(
                "transaction {} cannot move from {} to {}",
                self.id, self.status, next.status
            )));
        }

        let changed = |field: &str| {
            Err(Error::InvariantViolation(format!(
                "{field} of transaction {} cannot change once set",
                self.id
            )))
        };

        if self.key() != next.key() {
            return changed("key");
        }
        if self.from != next.from {
            return changed("sender");
        }
        if self.created_time != next.created_time {
            return changed("creation time");
        }
        if self.nonce.is_some() && self.nonce != next.nonce {
            return changed("nonce");
        }
        if self.tx_hash.is_some() && self.tx_hash != next.tx_hash {
            return changed("tx hash");
        }
        if self.submitted_time.is_some() && self.submitted_time != next.submitted_time {
            return changed("submission time");
        }
        if self.receipt.is_some() && self.receipt != next.receipt {
            return changed("receipt");
        }
        if self.confirmed_time.is_some() && self.confirmed_time != next.confirmed_time {
            return changed("confirmation time");
        }

        Ok(())
    }
}

mod option_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::TxHash;

    pub fn serialize<S: Serializer>(hash: &Option<TxHash>, serializer: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(hash) => serializer.serialize_some(&hex::encode(hash)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TxHash>, D::Error> {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };

        let mut hash = [0; 32];
        hex::decode_to_slice(encoded.trim_start_matches("0x"), &mut hash)
            .map_err(serde::de::Error::custom)?;

        Ok(Some(hash))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    fn given_unapproved() -> TransactionRecord {
        TransactionRecord::new(
            ChainScope::new("0x1").unwrap(),
            Address::repeat_byte(0xa),
            Payload::Unsigned(vec![1, 2, 3]),
            DateTime::<Utc>::from_timestamp(1_000, 0).unwrap(),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn successful_receipt() -> TransactionReceipt {
        TransactionReceipt::new(10, true, 21_000, 1)
    }

    #[test_case(TransactionStatus::Unapproved, TransactionStatus::Submitted, true; "unapproved to submitted")]
    #[test_case(TransactionStatus::Submitted, TransactionStatus::Confirmed, true; "submitted to confirmed")]
    #[test_case(TransactionStatus::Submitted, TransactionStatus::Dropped, true; "submitted to dropped")]
    #[test_case(TransactionStatus::Submitted, TransactionStatus::Submitted, true; "submitted update")]
    #[test_case(TransactionStatus::Unapproved, TransactionStatus::Confirmed, false; "skipping submission")]
    #[test_case(TransactionStatus::Confirmed, TransactionStatus::Submitted, false; "confirmed back to submitted")]
    #[test_case(TransactionStatus::Dropped, TransactionStatus::Submitted, false; "dropped back to submitted")]
    #[test_case(TransactionStatus::Confirmed, TransactionStatus::Dropped, false; "confirmed to dropped")]
    #[test_case(TransactionStatus::Dropped, TransactionStatus::Confirmed, false; "dropped to confirmed")]
    #[test_case(TransactionStatus::Submitted, TransactionStatus::Unapproved, false; "back to unapproved")]
    fn status_only_moves_forward(from: TransactionStatus, to: TransactionStatus, allowed: bool) {
        assert_eq!(from.can_become(to), allowed);
    }

    #[test]
    fn walks_through_the_lifecycle() {
        // given
        let record = given_unapproved();

        // when
        let submitted = record
            .clone()
            .submitted(5, [1; 32], Payload::Signed(vec![9]), at(1_001))
            .unwrap();
        let confirmed = submitted
            .clone()
            .confirmed(successful_receipt(), at(1_002))
            .unwrap();

        // then
        record.validate_successor(&submitted).unwrap();
        submitted.validate_successor(&confirmed).unwrap();
        confirmed.validate().unwrap();
        assert_eq!(confirmed.nonce, Some(5));
        assert_eq!(confirmed.confirmed_time, Some(at(1_002)));
        assert!(confirmed.receipt.unwrap().succeeded());
    }

    #[test]
    fn terminal_records_cannot_be_transitioned_again() {
        let dropped = given_unapproved()
            .submitted(1, [1; 32], Payload::Signed(vec![]), at(1_001))
            .unwrap()
            .dropped()
            .unwrap();

        let err = dropped
            .clone()
            .confirmed(successful_receipt(), at(1_003))
            .unwrap_err();

        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(matches!(dropped.dropped(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn failed_receipt_does_not_confirm() {
        let submitted = given_unapproved()
            .submitted(1, [1; 32], Payload::Signed(vec![]), at(1_001))
            .unwrap();

        let err = submitted
            .confirmed(TransactionReceipt::new(10, false, 21_000, 1), at(1_002))
            .unwrap_err();

        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn nonce_cannot_change_once_set() {
        // given
        let submitted = given_unapproved()
            .submitted(1, [1; 32], Payload::Signed(vec![]), at(1_001))
            .unwrap();
        let mut tampered = submitted.clone();
        tampered.nonce = Some(2);

        // when
        let err = submitted.validate_successor(&tampered).unwrap_err();

        // then
        assert!(err.to_string().contains("nonce"));
    }

    #[test]
    fn submitted_record_without_hash_is_invalid() {
        let mut record = given_unapproved()
            .submitted(1, [1; 32], Payload::Signed(vec![]), at(1_001))
            .unwrap();
        record.tx_hash = None;

        assert!(matches!(record.validate(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn confirmation_before_submission_is_invalid() {
        let mut record = given_unapproved()
            .submitted(1, [1; 32], Payload::Signed(vec![]), at(1_005))
            .unwrap()
            .confirmed(successful_receipt(), at(1_006))
            .unwrap();
        record.confirmed_time = Some(at(1_004));

        assert!(matches!(record.validate(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn serializes_hash_and_payload_as_hex() {
        let record = given_unapproved()
            .submitted(1, [0xab; 32], Payload::Signed(vec![0xde, 0xad]), at(1_001))
            .unwrap();

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["tx_hash"], serde_json::json!("ab".repeat(32)));
        assert_eq!(
            json["payload"],
            serde_json::json!({"kind": "signed", "bytes": "dead"})
        );
        assert_eq!(json["status"], serde_json::json!("submitted"));

        let decoded: TransactionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, record);
    }
}
