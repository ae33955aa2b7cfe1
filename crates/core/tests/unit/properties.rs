//! Invariant property tests.

use std::io;

use proptest::prelude::*;
use tempfile::TempDir;

use memsched_core::Scheduler;
use memsched_core::stats::{AccessClass, ThreadStats};

use crate::common::engine::TestEngine;
use crate::common::fixtures::{run_config, write_trace};

// ══════════════════════════════════════════════════════════
// 1. Classification
// ══════════════════════════════════════════════════════════

proptest! {
    /// Every page-state combination buckets into exactly one class, and the
    /// bucket matches the lifecycle priority.
    #[test]
    fn classification_is_exhaustive_and_exclusive(
        prefetched in any::<bool>(),
        accessed in any::<bool>(),
        attempted in any::<bool>(),
    ) {
        let class = AccessClass::of(prefetched, accessed, attempted);
        let expected = if prefetched && !accessed {
            AccessClass::PrefetchHit
        } else if accessed && attempted {
            AccessClass::PrefetchCachedHit
        } else if accessed {
            AccessClass::NonPrefetchHit
        } else {
            AccessClass::Miss
        };
        prop_assert_eq!(class, expected);
    }

    /// Recording an access increments exactly one bucket (and at most one
    /// first-access twin).
    #[test]
    fn record_access_increments_one_bucket(
        prefetched in any::<bool>(),
        accessed in any::<bool>(),
        attempted in any::<bool>(),
        first in any::<bool>(),
    ) {
        let mut stats = ThreadStats::default();
        let class = AccessClass::of(prefetched, accessed, attempted);
        stats.record_access(class, first);

        let buckets = stats.prefetch_hits
            + stats.prefetch_cached_hits
            + stats.nonprefetch_hits
            + stats.misses;
        let firsts = stats.first_prefetch_hits
            + stats.first_prefetch_cached_hits
            + stats.first_nonprefetch_hits
            + stats.first_misses;
        prop_assert_eq!(buckets, 1);
        prop_assert_eq!(firsts, u64::from(first));
    }
}

// ══════════════════════════════════════════════════════════
// 2. Pending accounting under random traces
// ══════════════════════════════════════════════════════════

fn trace_records() -> impl Strategy<Value = Vec<(u64, u64, u64)>> {
    prop::collection::vec((0u64..20, 0u64..4, 0u64..8192), 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// For arbitrary traces, `pending == issued - completed` at every cycle,
    /// pending never goes negative (it is unsigned and the subtraction never
    /// underflows), and every record eventually retires.
    #[test]
    fn pending_accounting_for_random_traces(records in trace_records()) {
        let body: String = records
            .iter()
            .map(|(due, dir, addr)| format!("{due} {dir} {addr}\n"))
            .collect();
        let dir = TempDir::new().unwrap();
        let path = write_trace(&dir, "t0.txt", &body);
        let cfg = run_config(vec![path], 1, 50, vec![vec![0]]);

        let engine = TestEngine::new(64, 1024, 32, 3);
        let mut s = Scheduler::new(cfg, Box::new(engine), Box::new(io::sink())).unwrap();

        loop {
            let stepped = s.step().unwrap();
            let stats = s.threads()[0].stats();
            prop_assert!(stats.completed <= stats.issued);
            prop_assert_eq!(s.pending(), stats.issued - stats.completed);
            if !stepped {
                break;
            }
        }
        let stats = s.threads()[0].stats();
        prop_assert_eq!(stats.issued, records.len() as u64);
        prop_assert_eq!(stats.completed, stats.issued);
        prop_assert_eq!(s.pending(), 0);
    }
}
