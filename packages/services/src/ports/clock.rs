use crate::types::{DateTime, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}
