use crate::models::{Spot, SpotSource};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct SourceStats {
    inserted: u64,
    last_insert: Option<DateTime<Utc>>,
}

struct Inner {
    /// Newest first
    spots: VecDeque<Spot>,
    max_size: usize,
    cluster: SourceStats,
    simulated: SourceStats,
}

impl Inner {
    fn stats_mut(&mut self, source: SpotSource) -> &mut SourceStats {
        match source {
            SpotSource::Cluster => &mut self.cluster,
            SpotSource::Simulated => &mut self.simulated,
        }
    }

    fn stats(&self, source: SpotSource) -> &SourceStats {
        match source {
            SpotSource::Cluster => &self.cluster,
            SpotSource::Simulated => &self.simulated,
        }
    }
}

/// Thread-safe, bounded store of recent spots, newest first
#[derive(Clone)]
pub struct SpotStore {
    inner: Arc<Mutex<Inner>>,
}

impl SpotStore {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                spots: VecDeque::with_capacity(max_size),
                max_size,
                cluster: SourceStats::default(),
                simulated: SourceStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking writer cannot leave the deque half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a spot at the front, dropping the oldest beyond capacity
    pub fn insert_front(&self, spot: Spot) {
        let mut inner = self.lock();
        let stats = inner.stats_mut(spot.source);
        stats.inserted += 1;
        stats.last_insert = Some(spot.received_at);

        inner.spots.push_front(spot);
        let max_size = inner.max_size;
        inner.spots.truncate(max_size);
    }

    /// Point-in-time copy of every spot, newest first
    pub fn snapshot(&self) -> Vec<Spot> {
        self.lock().spots.iter().cloned().collect()
    }

    /// At most `limit` of the newest spots
    pub fn recent(&self, limit: Option<usize>) -> Vec<Spot> {
        let inner = self.lock();
        let limit = limit.unwrap_or(inner.spots.len());
        inner.spots.iter().take(limit).cloned().collect()
    }

    /// Remove spots received more than `max_age` ago, returning how many went
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let mut inner = self.lock();
        let before = inner.spots.len();
        if let Some(cutoff) = cutoff {
            inner.spots.retain(|spot| spot.received_at >= cutoff);
        }
        before - inner.spots.len()
    }

    /// Number of spots ever inserted from `source`, evicted ones included
    pub fn inserted_total(&self, source: SpotSource) -> u64 {
        self.lock().stats(source).inserted
    }

    /// When a spot from `source` was last inserted
    pub fn last_insert(&self, source: SpotSource) -> Option<DateTime<Utc>> {
        self.lock().stats(source).last_insert
    }

    /// Get spot count
    pub fn len(&self) -> usize {
        self.lock().spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().spots.is_empty()
    }

    /// Clear all spots
    pub fn clear(&self) {
        self.lock().spots.clear();
    }
}
