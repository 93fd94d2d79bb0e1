//! ControlStateStore - Runtime detector toggles
//!
//! ## Responsibilities
//!
//! - Hold the enable flag of each optional detector (identity is always on)
//! - Serialize operator writes; hand out whole-map snapshots to frame loops
//! - Report whether a write changed anything so the caller can broadcast it
//!
//! The current value lives in a `tokio::sync::watch` channel: writes replace the value
//! under the channel's exclusive lock and readers copy the whole struct out, so a reader
//! never sees half of an update.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Snapshot of all detector toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlState {
    pub audio: bool,
    pub gaze: bool,
    pub object: bool,
    pub posture: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            audio: true,
            gaze: true,
            object: true,
            posture: true,
        }
    }
}

impl ControlState {
    pub fn is_enabled(&self, toggle: DetectorToggle) -> bool {
        match toggle {
            DetectorToggle::Audio => self.audio,
            DetectorToggle::Gaze => self.gaze,
            DetectorToggle::Object => self.object,
            DetectorToggle::Posture => self.posture,
        }
    }

    fn slot(&mut self, toggle: DetectorToggle) -> &mut bool {
        match toggle {
            DetectorToggle::Audio => &mut self.audio,
            DetectorToggle::Gaze => &mut self.gaze,
            DetectorToggle::Object => &mut self.object,
            DetectorToggle::Posture => &mut self.posture,
        }
    }
}

/// Optional detectors an operator may toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorToggle {
    Audio,
    Gaze,
    Object,
    Posture,
}

impl DetectorToggle {
    pub const ALL: [DetectorToggle; 4] = [
        DetectorToggle::Audio,
        DetectorToggle::Gaze,
        DetectorToggle::Object,
        DetectorToggle::Posture,
    ];

    /// Parse a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "audio" => Some(DetectorToggle::Audio),
            "gaze" => Some(DetectorToggle::Gaze),
            "object" => Some(DetectorToggle::Object),
            "posture" => Some(DetectorToggle::Posture),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorToggle::Audio => "audio",
            DetectorToggle::Gaze => "gaze",
            DetectorToggle::Object => "object",
            DetectorToggle::Posture => "posture",
        }
    }
}

impl fmt::Display for DetectorToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a `set` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlUpdate {
    /// State right after this write
    pub snapshot: ControlState,
    /// False for unknown names and for writes that did not change the value
    pub changed: bool,
}

/// ControlStateStore instance
pub struct ControlStateStore {
    tx: watch::Sender<ControlState>,
    /// Held by writers from their write until their broadcast is done
    writers: Mutex<()>,
}

/// Exclusive writer: updates made through it are published before the next writer runs
pub struct ControlWriter<'a> {
    store: &'a ControlStateStore,
    _guard: MutexGuard<'a, ()>,
}

impl ControlWriter<'_> {
    pub fn set(&self, name: &str, enabled: bool) -> ControlUpdate {
        self.store.set(name, enabled)
    }
}

impl ControlStateStore {
    /// Create store with every detector enabled
    pub fn new() -> Self {
        Self::with_state(ControlState::default())
    }

    pub fn with_state(initial: ControlState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            writers: Mutex::new(()),
        }
    }

    /// Wait for exclusive write access
    pub async fn writer(&self) -> ControlWriter<'_> {
        ControlWriter {
            store: self,
            _guard: self.writers.lock().await,
        }
    }

    /// Current snapshot
    pub fn get(&self) -> ControlState {
        *self.tx.borrow()
    }

    /// Set one toggle by wire name
    ///
    /// Unknown names are ignored (`changed = false`); callers may be stale clients.
    pub fn set(&self, name: &str, enabled: bool) -> ControlUpdate {
        match DetectorToggle::from_name(name) {
            Some(toggle) => self.set_toggle(toggle, enabled),
            None => {
                tracing::debug!(name = %name, "Ignoring unknown control name");
                ControlUpdate {
                    snapshot: self.get(),
                    changed: false,
                }
            }
        }
    }

    /// Set one toggle
    pub fn set_toggle(&self, toggle: DetectorToggle, enabled: bool) -> ControlUpdate {
        let mut snapshot = ControlState::default();
        let changed = self.tx.send_if_modified(|state| {
            let slot = state.slot(toggle);
            let changed = *slot != enabled;
            *slot = enabled;
            snapshot = *state;
            changed
        });

        if changed {
            tracing::info!(control = %toggle, enabled = enabled, "Control state updated");
        }

        ControlUpdate { snapshot, changed }
    }

    /// Receiver that observes every committed snapshot
    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.tx.subscribe()
    }
}

impl Default for ControlStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_defaults_all_enabled() {
        let store = ControlStateStore::new();
        let state = store.get();
        for toggle in DetectorToggle::ALL {
            assert!(state.is_enabled(toggle));
        }
    }

    #[test]
    fn test_set_known_name() {
        let store = ControlStateStore::new();
        let update = store.set("gaze", false);
        assert!(update.changed);
        assert!(!update.snapshot.gaze);
        assert!(update.snapshot.audio);
        assert_eq!(store.get(), update.snapshot);
    }

    #[test]
    fn test_set_same_value_is_not_a_change() {
        let store = ControlStateStore::new();
        let update = store.set("audio", true);
        assert!(!update.changed);
        assert_eq!(update.snapshot, ControlState::default());
    }

    #[test]
    fn test_unknown_name_ignored() {
        let store = ControlStateStore::new();
        let update = store.set("identity", false);
        assert!(!update.changed);
        assert_eq!(store.get(), ControlState::default());

        let update = store.set("", false);
        assert!(!update.changed);
    }

    #[tokio::test]
    async fn test_subscriber_sees_update() {
        let store = ControlStateStore::new();
        let mut rx = store.subscribe();
        store.set("object", false);
        rx.changed().await.unwrap();
        assert!(!rx.borrow().object);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_only_see_committed_states() {
        let store = Arc::new(ControlStateStore::new());
        let committed = Arc::new(Mutex::new(HashSet::from([ControlState::default()])));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut seen = HashSet::new();
                while !done.load(Ordering::Acquire) {
                    seen.insert(store.get());
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        let mut writers = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let committed = committed.clone();
            writers.push(tokio::spawn(async move {
                let toggle = DetectorToggle::ALL[i % 4];
                for n in 0..200 {
                    let update = store.set_toggle(toggle, n % 2 == 0);
                    committed.lock().await.insert(update.snapshot);
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }
        done.store(true, Ordering::Release);

        let seen = reader.await.unwrap();
        let committed = committed.lock().await;
        assert!(!seen.is_empty());
        for snapshot in &seen {
            assert!(committed.contains(snapshot), "torn snapshot {:?}", snapshot);
        }

        // Final write per toggle was n = 199 -> false
        let state = store.get();
        for toggle in DetectorToggle::ALL {
            assert!(!state.is_enabled(toggle));
        }
    }

    #[test]
    fn test_read_after_write_is_linearizable() {
        let store = ControlStateStore::new();
        store.set("posture", false);
        assert!(!store.get().posture);
        store.set("posture", true);
        assert!(store.get().posture);
    }
}
