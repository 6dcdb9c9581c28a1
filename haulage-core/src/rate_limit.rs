//! Token buckets for outbound notifications.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Capacity and refill of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl BucketSpec {
    /// `count` tokens per hour, all available up front.
    pub fn per_hour(count: u32) -> Self {
        Self {
            capacity: count,
            refill_per_sec: f64::from(count) / 3600.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    updated_at: OffsetDateTime,
}

impl Bucket {
    fn full(spec: &BucketSpec, now: OffsetDateTime) -> Self {
        Self {
            tokens: f64::from(spec.capacity),
            updated_at: now,
        }
    }

    fn refill(&mut self, spec: &BucketSpec, now: OffsetDateTime) {
        let elapsed = (now - self.updated_at).as_seconds_f64().max(0.0);
        self.tokens = (self.tokens + elapsed * spec.refill_per_sec).min(f64::from(spec.capacity));
        self.updated_at = now;
    }
}

/// Per-key buckets plus one coarse global bucket.
///
/// A take succeeds only if both the key's bucket and the global bucket have a
/// token; neither is debited otherwise.
pub struct TokenBuckets<K> {
    per_key: BucketSpec,
    global_spec: BucketSpec,
    state: Mutex<BucketState<K>>,
}

struct BucketState<K> {
    keyed: HashMap<K, Bucket>,
    global: Option<Bucket>,
}

impl<K: Eq + Hash + Clone> TokenBuckets<K> {
    pub fn new(per_key: BucketSpec, global: BucketSpec) -> Self {
        Self {
            per_key,
            global_spec: global,
            state: Mutex::new(BucketState {
                keyed: HashMap::new(),
                global: None,
            }),
        }
    }

    pub fn try_take(&self, key: &K, now: OffsetDateTime) -> bool {
        let mut state = self.state.lock();
        let global_spec = self.global_spec;
        let per_key = self.per_key;

        let mut global = state
            .global
            .unwrap_or_else(|| Bucket::full(&global_spec, now));
        global.refill(&global_spec, now);

        let mut keyed = state
            .keyed
            .get(key)
            .copied()
            .unwrap_or_else(|| Bucket::full(&per_key, now));
        keyed.refill(&per_key, now);

        let admitted = global.tokens >= 1.0 && keyed.tokens >= 1.0;
        if admitted {
            global.tokens -= 1.0;
            keyed.tokens -= 1.0;
        }
        state.global = Some(global);
        state.keyed.insert(key.clone(), keyed);
        admitted
    }

    /// Drop buckets that have refilled completely.
    pub fn prune(&self, now: OffsetDateTime) {
        let per_key = self.per_key;
        self.state.lock().keyed.retain(|_, bucket| {
            let mut b = *bucket;
            b.refill(&per_key, now);
            b.tokens < f64::from(per_key.capacity)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_per_key_limit_and_refill() {
        let buckets = TokenBuckets::new(
            BucketSpec {
                capacity: 2,
                refill_per_sec: 1.0,
            },
            BucketSpec::per_hour(100),
        );
        let t0 = datetime!(2026-01-01 00:00 UTC);
        assert!(buckets.try_take(&"alice", t0));
        assert!(buckets.try_take(&"alice", t0));
        assert!(!buckets.try_take(&"alice", t0));
        assert!(buckets.try_take(&"bob", t0));
        assert!(buckets.try_take(&"alice", t0 + time::Duration::seconds(1)));
    }

    #[test]
    fn test_global_bucket_caps_everyone() {
        let buckets = TokenBuckets::new(
            BucketSpec::per_hour(10),
            BucketSpec {
                capacity: 2,
                refill_per_sec: 0.0,
            },
        );
        let t0 = datetime!(2026-01-01 00:00 UTC);
        assert!(buckets.try_take(&1, t0));
        assert!(buckets.try_take(&2, t0));
        assert!(!buckets.try_take(&3, t0));
    }

    #[test]
    fn test_prune_drops_full_buckets() {
        let buckets = TokenBuckets::new(
            BucketSpec {
                capacity: 1,
                refill_per_sec: 1.0,
            },
            BucketSpec::per_hour(100),
        );
        let t0 = datetime!(2026-01-01 00:00 UTC);
        assert!(buckets.try_take(&"k", t0));
        buckets.prune(t0 + time::Duration::seconds(5));
        assert!(buckets.state.lock().keyed.is_empty());
    }
}
