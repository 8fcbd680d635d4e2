//! `DiagnosticService`: a bounded ring buffer of combined snapshots from all
//! registered [`DiagnosticSupplier`]s, grounded on
//! `examples/original_source/common/oauth2/diagnostics/diagnostic_service.{h,cc}`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::traits::DiagnosticSupplier;

/// One combined snapshot: every supplier's non-empty fragment, keyed by
/// [`DiagnosticSupplier::diagnostic_name`], plus the time it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub state: serde_json::Value,
}

/// Notified whenever [`DiagnosticService::take_snapshot`] actually records a
/// new snapshot (i.e. the combined state changed).
pub trait DiagnosticObserver: Send + Sync {
    fn on_state_update(&self);
}

struct Inner {
    max_items: usize,
    snapshots: Mutex<VecDeque<Snapshot>>,
    suppliers: Mutex<Vec<Weak<dyn DiagnosticSupplier>>>,
    observers: Mutex<Vec<Weak<dyn DiagnosticObserver>>>,
}

/// Collects diagnostic fragments from registered suppliers into a
/// deduplicated, size-bounded history. Cheaply `Clone`.
#[derive(Clone)]
pub struct DiagnosticService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DiagnosticService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticService").finish_non_exhaustive()
    }
}

impl DiagnosticService {
    /// # Panics
    /// Panics if `max_items` is zero (mirrors the original's `DCHECK_GT`).
    #[must_use]
    pub fn new(max_items: usize) -> Self {
        assert!(max_items > 0, "DiagnosticService::new: max_items must be positive");
        Self {
            inner: Arc::new(Inner {
                max_items,
                snapshots: Mutex::new(VecDeque::new()),
                suppliers: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn max_items(&self) -> usize {
        self.inner.max_items
    }

    pub fn add_supplier(&self, supplier: &Arc<dyn DiagnosticSupplier>) {
        self.inner.suppliers.lock().expect("diagnostic service lock poisoned").push(Arc::downgrade(supplier));
    }

    /// Drops suppliers whose weak reference is gone along with `supplier`.
    pub fn remove_supplier(&self, supplier: &Arc<dyn DiagnosticSupplier>) {
        let target = Arc::as_ptr(supplier);
        self.inner
            .suppliers
            .lock()
            .expect("diagnostic service lock poisoned")
            .retain(|s| s.upgrade().is_some_and(|s| !std::ptr::eq(Arc::as_ptr(&s), target)));
    }

    pub fn add_observer(&self, observer: &Arc<dyn DiagnosticObserver>) {
        self.inner.observers.lock().expect("diagnostic service lock poisoned").push(Arc::downgrade(observer));
    }

    pub fn remove_observer(&self, observer: &Arc<dyn DiagnosticObserver>) {
        let target = Arc::as_ptr(observer);
        self.inner
            .observers
            .lock()
            .expect("diagnostic service lock poisoned")
            .retain(|o| o.upgrade().is_some_and(|o| !std::ptr::eq(Arc::as_ptr(&o), target)));
    }

    /// Query every registered supplier and, if the combined state differs
    /// from the most recent snapshot, record a new one and notify
    /// observers. A no-op if the combined state is empty or unchanged.
    pub fn take_snapshot(&self) {
        let mut combined = serde_json::Map::new();
        for supplier in self.inner.suppliers.lock().expect("diagnostic service lock poisoned").iter() {
            let Some(supplier) = supplier.upgrade() else { continue };
            let fragment = supplier.diagnostic_snapshot();
            if fragment.as_object().is_some_and(serde_json::Map::is_empty) {
                continue;
            }
            combined.insert(supplier.diagnostic_name().to_string(), fragment);
        }
        if combined.is_empty() {
            return;
        }
        let combined = serde_json::Value::Object(combined);

        let mut snapshots = self.inner.snapshots.lock().expect("diagnostic service lock poisoned");
        if snapshots.front().is_some_and(|first| first.state == combined) {
            return;
        }
        snapshots.push_front(Snapshot {
            timestamp: Utc::now(),
            state: combined,
        });
        if snapshots.len() > self.inner.max_items {
            snapshots.pop_back();
        }
        drop(snapshots);

        for observer in self.inner.observers.lock().expect("diagnostic service lock poisoned").iter() {
            if let Some(observer) = observer.upgrade() {
                observer.on_state_update();
            }
        }
    }

    #[must_use]
    pub fn get_all_snapshots(&self) -> Vec<Snapshot> {
        self.inner.snapshots.lock().expect("diagnostic service lock poisoned").iter().cloned().collect()
    }

    /// Same as [`Self::get_all_snapshots`], but every key ending in `_time`
    /// (case-insensitive) gets a sibling `<key>_str` with a human-readable
    /// rendering, recursively through nested objects and arrays.
    #[must_use]
    pub fn get_all_snapshots_with_formatted_times(&self) -> Vec<Snapshot> {
        self.get_all_snapshots()
            .into_iter()
            .map(|mut snapshot| {
                format_times(&mut snapshot.state);
                snapshot
            })
            .collect()
    }
}

fn format_times(value: &mut serde_json::Value) {
    let serde_json::Value::Object(map) = value else {
        return;
    };
    let mut additions = Vec::new();
    for (key, v) in map.iter_mut() {
        if key.to_ascii_lowercase().ends_with("_time") {
            if let Some(unix) = v.as_i64() {
                if let Some(dt) = DateTime::from_timestamp(unix, 0) {
                    additions.push((format!("{key}_str"), serde_json::Value::String(dt.to_rfc3339())));
                }
            }
        } else if v.is_object() {
            format_times(v);
        } else if let Some(list) = v.as_array_mut() {
            for item in list.iter_mut() {
                format_times(item);
            }
        }
    }
    for (key, value) in additions {
        map.insert(key, value);
    }
}
