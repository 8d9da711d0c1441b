//! Settings bus
//!
//! Synchronous in-process observer registry owned by the session. Listeners are
//! invoked inline on the emitting call, in subscription order; a panicking
//! listener is caught and logged and never aborts the emitter or the listeners
//! after it.

use crate::engine::PlayerProfile;
use crate::types::SessionPhase;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// A piece of session state that changed; listeners re-query what they need
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    /// Quality levels or the active level changed
    Quality,
    AudioTracks,
    TextTracks,
    /// A new manifest was parsed by the attached engine
    Manifest,
    Casting(bool),
    Live { live: bool, dvr: bool },
    Profile(PlayerProfile),
    PlaybackRate(f64),
    /// Collection items or the active item changed
    Collection,
    Phase(SessionPhase),
    /// User-visible message set or cleared
    ErrorMessage(Option<String>),
    /// Content verification finished
    Verification,
}

type Listener = Arc<dyn Fn(&SettingsChange) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener)>>,
}

/// Long-lived observer registry
#[derive(Clone, Default)]
pub struct SettingsBus {
    registry: Arc<Registry>,
}

impl SettingsBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned handle removes it again
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SettingsChange) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Notify every listener registered at the time of the call
    pub fn emit(&self, change: SettingsChange) {
        // Snapshot so listeners may subscribe or unsubscribe while being notified
        let listeners: Vec<Listener> = self
            .registry
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&change))).is_err() {
                error!(?change, "Settings listener panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.read().len()
    }
}

impl std::fmt::Debug for SettingsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Disposer returned by [`SettingsBus::subscribe`]
#[must_use = "dropping a subscription keeps the listener registered; call `unsubscribe` to remove it"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the listener. Safe after the bus itself is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}
