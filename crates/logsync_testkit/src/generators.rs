//! Property-based test generators using proptest.

use crate::collector::Verdict;
use logsync_engine::{DeliveryConfig, OverflowPolicy, StoreConfig};
use proptest::prelude::*;

/// Strategy for a single log payload.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

/// Strategy for a batch of distinct log payloads.
///
/// Each payload is prefixed with its index so that payloads can be matched
/// back to the order they were appended in.
pub fn payload_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(payload_strategy(), 0..=max).prop_map(|batch| {
        batch
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                let mut payload = (i as u32).to_be_bytes().to_vec();
                payload.append(&mut p);
                payload
            })
            .collect()
    })
}

/// Strategy for a valid delivery configuration with immediate retries.
pub fn delivery_config_strategy() -> impl Strategy<Value = DeliveryConfig> {
    (1u32..8, 0u32..4, 1u32..4).prop_map(|(size, ceiling, in_flight)| {
        DeliveryConfig::new(size, ceiling)
            .expect("valid config")
            .with_max_in_flight_buckets(in_flight)
    })
}

/// Strategy for a valid store configuration.
pub fn store_config_strategy() -> impl Strategy<Value = StoreConfig> {
    (
        1usize..256,
        prop_oneof![Just(OverflowPolicy::DropOldest), Just(OverflowPolicy::Reject)],
    )
        .prop_map(|(capacity, overflow)| StoreConfig::new(capacity, overflow).expect("valid config"))
}

/// Strategy for one collector verdict.
pub fn verdict_strategy() -> impl Strategy<Value = Verdict> {
    prop_oneof![
        4 => Just(Verdict::Deliver),
        2 => Just(Verdict::Fail),
        1 => Just(Verdict::LoseResponse),
        1 => Just(Verdict::LoseRequest),
        1 => Just(Verdict::Ignore),
    ]
}

/// Strategy for a collector script.
pub fn verdict_script_strategy(max: usize) -> impl Strategy<Value = Vec<Verdict>> {
    prop::collection::vec(verdict_strategy(), 0..=max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn batches_are_distinct() {
        let mut runner = TestRunner::default();
        let batch = payload_batch_strategy(16)
            .new_tree(&mut runner)
            .unwrap()
            .current();
        let mut sorted = batch.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), batch.len());
    }

    proptest! {
        #[test]
        fn configs_validate(config in delivery_config_strategy()) {
            prop_assert!(config.validate().is_ok());
        }
    }
}
