//! Property tests for mailbox ordering

use patchbay_core::Queue;
use patchbay_tests::{OrderLog, generous_drain};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_single_producer_order_is_preserved(capacity in 1usize..16, count in 0usize..64) {
        let queue = Queue::with_config(&generous_drain(capacity));
        queue.start().unwrap();
        let log = OrderLog::new();

        for id in 0..count {
            queue.enqueue(log.op(id)).unwrap();
        }
        queue.close();

        prop_assert_eq!(log.entries(), (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn prop_each_producer_keeps_its_own_order(
        capacity in 1usize..8,
        producers in 1usize..5,
        per_producer in 1usize..24,
    ) {
        let queue = Arc::new(Queue::with_config(&generous_drain(capacity)));
        queue.start().unwrap();
        let log = OrderLog::new();

        let handles: Vec<_> = (0..producers)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                let log = log.clone();
                thread::spawn(move || {
                    for seq in 0..per_producer {
                        queue.enqueue(log.op(producer * 1000 + seq)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        queue.close();

        let entries = log.entries();
        prop_assert_eq!(entries.len(), producers * per_producer);
        for producer in 0..producers {
            let seen: Vec<usize> = entries
                .iter()
                .filter(|id| *id / 1000 == producer)
                .map(|id| id % 1000)
                .collect();
            prop_assert_eq!(seen, (0..per_producer).collect::<Vec<_>>());
        }
    }
}
