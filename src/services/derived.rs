use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::AppError;
use crate::services::analysis::anomaly::Anomaly;
use crate::services::analysis::charts::ChartSeries;
use crate::services::analysis::comparison::SegmentSummary;
use crate::services::analysis::correlation::{Correlation, CorrelationMatrix};
use crate::services::analysis::profiler::MeanExtremes;
use crate::services::analysis::scenario::ScenarioRecord;

const DEFAULT_CAPACITY: usize = 64;

/// LRU of derived results keyed by (snapshot version, parameters). Entries
/// from older versions can never be hit again; `clear` drops them early.
pub struct Memo<K: Hash + Eq, V> {
    entries: Mutex<LruCache<(u64, K), Arc<V>>>,
}

impl<K: Hash + Eq, V> Memo<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached value or computes, stores and returns it. The
    /// computation runs outside the lock; a racing duplicate is harmless.
    pub fn get_or_compute<F>(&self, version: u64, key: K, compute: F) -> Result<Arc<V>, AppError>
    where
        F: FnOnce() -> Result<V, AppError>,
    {
        let cache_key = (version, key);
        if let Some(hit) = self.entries.lock().get(&cache_key) {
            return Ok(hit.clone());
        }

        let value = Arc::new(compute()?);
        self.entries.lock().put(cache_key, value.clone());
        Ok(value)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One memo per derived analysis. Filter results are not cached since the
/// rule list is a free-form request body.
#[derive(Default)]
pub struct DerivedMemos {
    pub anomalies: Memo<(), Vec<Anomaly>>,
    pub correlations: Memo<(String, String), Correlation>,
    pub correlation_matrix: Memo<(), CorrelationMatrix>,
    pub comparisons: Memo<(String, String), Vec<SegmentSummary>>,
    pub scenarios: Memo<(String, String, u64), Vec<ScenarioRecord>>,
    pub charts: Memo<(Vec<String>, String), ChartSeries>,
    pub mean_extremes: Memo<(), Option<MeanExtremes>>,
}

impl DerivedMemos {
    pub fn clear(&self) {
        self.anomalies.clear();
        self.correlations.clear();
        self.correlation_matrix.clear();
        self.comparisons.clear();
        self.scenarios.clear();
        self.charts.clear();
        self.mean_extremes.clear();
        tracing::debug!("Cleared derived analysis caches");
    }
}
