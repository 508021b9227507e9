use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::event::EventHub;

/// Progress of one long-running side activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "content")]
pub enum Progress {
    Unknown,
    Pending { consumed: u64, total: u64 },
    Complete,
}

/// Registry of long-running side activities, keyed by component name.
///
/// Several entries of the same component may run at once (e.g. two
/// independent wallet syncs); observers get the conservative merge of all
/// of them.
pub struct BackgroundProcesses {
    entries: Mutex<HashMap<String, HashMap<u64, Progress>>>,
    next_id: AtomicU64,
    hub: EventHub,
}

impl BackgroundProcesses {
    pub fn new(hub: EventHub) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            hub,
        }
    }

    /// Register a new entry; progress starts out `Unknown`. The entry is
    /// removed when the returned handle is dropped.
    pub fn start(self: &Arc<Self>, component: &str) -> BackgroundHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("background mutex poisoned")
            .entry(component.to_string())
            .or_default()
            .insert(id, Progress::Unknown);
        self.publish(component);

        BackgroundHandle {
            registry: self.clone(),
            component: component.to_string(),
            id,
        }
    }

    /// Merge all entries of one component, conservatively: the least
    /// consumed against the largest total, so the reported progress never
    /// overstates what has actually happened.
    pub fn merged(&self, component: &str) -> Option<Progress> {
        let entries = self.entries.lock().expect("background mutex poisoned");
        let entries = entries.get(component)?;
        if entries.is_empty() {
            return None;
        }

        if entries.values().any(|p| matches!(p, Progress::Unknown)) {
            return Some(Progress::Unknown);
        }
        if entries.values().all(|p| matches!(p, Progress::Complete)) {
            return Some(Progress::Complete);
        }

        let mut consumed = u64::MAX;
        let mut total = 0;
        for progress in entries.values() {
            if let Progress::Pending {
                consumed: c,
                total: t,
            } = progress
            {
                consumed = consumed.min(*c);
                total = total.max(*t);
            }
        }
        Some(Progress::Pending { consumed, total })
    }

    fn update(&self, component: &str, id: u64, progress: Progress) {
        let mut entries = self.entries.lock().expect("background mutex poisoned");
        if let Some(component_entries) = entries.get_mut(component)
            && let Some(entry) = component_entries.get_mut(&id)
        {
            *entry = progress;
        }
        drop(entries);
        self.publish(component);
    }

    fn remove(&self, component: &str, id: u64) {
        let mut entries = self.entries.lock().expect("background mutex poisoned");
        if let Some(component_entries) = entries.get_mut(component) {
            component_entries.remove(&id);
            if component_entries.is_empty() {
                entries.remove(component);
            }
        }
        drop(entries);
        self.publish(component);
    }

    fn publish(&self, component: &str) {
        if let Some(progress) = self.merged(component) {
            self.hub.emit_background_progress(component, progress);
        }
    }
}

/// Live handle to one background entry.
pub struct BackgroundHandle {
    registry: Arc<BackgroundProcesses>,
    component: String,
    id: u64,
}

impl BackgroundHandle {
    pub fn update(&self, progress: Progress) {
        self.registry.update(&self.component, self.id, progress);
    }

    pub fn complete(&self) {
        self.update(Progress::Complete);
    }
}

impl Drop for BackgroundHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.component, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<BackgroundProcesses> {
        Arc::new(BackgroundProcesses::new(EventHub::default()))
    }

    #[test]
    fn merge_takes_least_consumed_and_largest_total() {
        let registry = registry();
        let a = registry.start("SyncingBitcoinWallet");
        let b = registry.start("SyncingBitcoinWallet");

        a.update(Progress::Pending {
            consumed: 10,
            total: 100,
        });
        b.update(Progress::Pending {
            consumed: 30,
            total: 50,
        });

        assert_eq!(
            registry.merged("SyncingBitcoinWallet"),
            Some(Progress::Pending {
                consumed: 10,
                total: 100
            })
        );
    }

    #[test]
    fn unknown_entry_dominates() {
        let registry = registry();
        let a = registry.start("SyncingMoneroWallet");
        let _b = registry.start("SyncingMoneroWallet");

        a.update(Progress::Pending {
            consumed: 5,
            total: 10,
        });

        assert_eq!(
            registry.merged("SyncingMoneroWallet"),
            Some(Progress::Unknown)
        );
    }

    #[test]
    fn complete_only_when_all_entries_complete() {
        let registry = registry();
        let a = registry.start("OpeningDatabase");
        let b = registry.start("OpeningDatabase");

        a.complete();
        b.update(Progress::Pending {
            consumed: 1,
            total: 2,
        });
        assert_eq!(
            registry.merged("OpeningDatabase"),
            Some(Progress::Pending {
                consumed: 1,
                total: 2
            })
        );

        b.complete();
        assert_eq!(registry.merged("OpeningDatabase"), Some(Progress::Complete));
    }

    #[test]
    fn dropping_the_handle_removes_the_entry() {
        let registry = registry();
        let a = registry.start("SyncingBitcoinWallet");
        drop(a);
        assert_eq!(registry.merged("SyncingBitcoinWallet"), None);
    }
}
