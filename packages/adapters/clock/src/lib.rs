use services::{
    ports::clock::Clock,
    types::{DateTime, Utc},
};

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(feature = "test-helpers")]
mod test_helpers {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicI64, Ordering},
        },
        time::Duration,
    };

    use services::{
        ports::clock::Clock,
        types::{DateTime, Utc},
    };

    /// Manually driven clock. Clones share the same time.
    #[derive(Debug, Default, Clone)]
    pub struct TestClock {
        epoch_millis: Arc<AtomicI64>,
    }

    impl TestClock {
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                epoch_millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
            }
        }

        pub fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp_millis(self.epoch_millis.load(Ordering::Relaxed))
                .expect("DateTime<Utc> to be in range")
        }

        pub fn advance_time(&self, adv: Duration) {
            let new_time = self.now() + adv;
            self.set_time(new_time);
        }

        pub fn set_time(&self, new_time: DateTime<Utc>) {
            self.epoch_millis
                .store(new_time.timestamp_millis(), Ordering::Relaxed)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            TestClock::now(self)
        }
    }
}

#[cfg(feature = "test-helpers")]
pub use test_helpers::TestClock;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use services::ports::clock::Clock;

    use crate::{SystemClock, TestClock};

    #[tokio::test]
    async fn can_advance_clock() {
        // given
        let test_clock = TestClock::default();
        let starting_time = test_clock.now();
        let adv = Duration::from_secs(1);

        // when
        test_clock.advance_time(adv);

        // then
        let new_time = starting_time + adv;
        assert_eq!(Clock::now(&test_clock), new_time);
    }

    #[test]
    fn system_clock_moves_forward() {
        let first = SystemClock.now();
        let second = SystemClock.now();

        assert!(second >= first);
    }
}
