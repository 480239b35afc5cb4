//! Single-slot, first-write-wins failure channel.

use std::sync::OnceLock;

use crate::error::Failure;

/// Holds the one failure that ends a scenario.
///
/// The first `offer` wins; every later offer is dropped. When two offers
/// race, exactly one is stored and which one is unspecified.
#[derive(Debug, Default)]
pub(crate) struct FailureChannel {
    slot: OnceLock<Failure>,
}

impl FailureChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores `failure` if the slot is empty. Returns whether it was stored.
    pub(crate) fn offer(&self, failure: Failure) -> bool {
        match self.slot.set(failure) {
            Ok(()) => true,
            Err(dropped) => {
                tracing::trace!(failure = %dropped, "discarding secondary failure");
                false
            }
        }
    }

    pub(crate) fn peek(&self) -> Option<&Failure> {
        self.slot.get()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slot.get().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn timeout() -> Failure {
        Failure::Timeout {
            timeout: Duration::from_secs(5),
        }
    }

    fn deadlock() -> Failure {
        Failure::DeadlockSuspected {
            cycles: 50,
            waited: Duration::from_millis(500),
        }
    }

    #[test]
    fn first_offer_wins() {
        let channel = FailureChannel::new();
        assert!(channel.is_empty());

        assert!(channel.offer(deadlock()));
        assert!(!channel.offer(timeout()));

        assert_eq!(channel.peek().map(Failure::kind), Some(FailureKind::Deadlock));
    }

    #[test]
    fn concurrent_offers_store_exactly_one() {
        let channel = Arc::new(FailureChannel::new());

        let winners: usize = (0..8)
            .map(|i| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    let failure = Failure::Panicked {
                        worker: format!("worker-{i}"),
                        message: "boom".into(),
                    };
                    usize::from(channel.offer(failure))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
        assert!(channel.peek().and_then(Failure::worker).is_some());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn slot_keeps_the_first_of_any_sequence(names in prop::collection::vec("[a-z]{1,8}", 1..16)) {
                let channel = FailureChannel::new();
                for name in &names {
                    channel.offer(Failure::Panicked { worker: name.clone(), message: String::new() });
                }
                prop_assert_eq!(channel.peek().and_then(Failure::worker), Some(names[0].as_str()));
            }
        }
    }
}
