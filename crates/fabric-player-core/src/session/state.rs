//! Mutable per-session state and recovery timers

use crate::classify::ErrorRecord;
use crate::engine::PlayerProfile;
use crate::negotiation::NegotiationResult;
use crate::resolver::{CollectionItem, VerificationResult};
use crate::types::{ResumeSnapshot, SessionPhase};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Everything the session mutates between phases
#[derive(Debug)]
pub(crate) struct SessionState {
    pub phase: SessionPhase,
    /// Bumped on every teardown; events from older engines are dropped
    pub generation: u64,
    pub negotiation: Option<NegotiationResult>,
    pub error_message: Option<String>,
    pub last_error: Option<ErrorRecord>,
    pub is_live: bool,
    pub dvr: bool,
    pub known_duration: Option<f64>,
    pub casting: bool,
    pub profile: PlayerProfile,
    pub custom_hls_options: Option<Map<String, Value>>,
    pub collection: Option<CollectionState>,
    pub verification: Option<VerificationResult>,
    pub last_text_track: Option<i32>,
    /// Applied once the current engine reports its first frame
    pub pending_restore: Option<ResumeSnapshot>,
    pub first_frame_seen: bool,
    pub initial_autoplay_done: bool,
    /// In-place media recovery already used for the current symptom
    pub media_recovery_attempted: bool,
}

impl SessionState {
    pub fn new(profile: PlayerProfile, custom_hls_options: Option<Map<String, Value>>, is_live: bool, dvr: bool) -> Self {
        Self {
            phase: SessionPhase::Created,
            generation: 0,
            negotiation: None,
            error_message: None,
            last_error: None,
            is_live,
            dvr,
            known_duration: None,
            casting: false,
            profile,
            custom_hls_options,
            collection: None,
            verification: None,
            last_text_track: None,
            pending_restore: None,
            first_frame_seen: false,
            initial_autoplay_done: false,
            media_recovery_attempted: false,
        }
    }

    /// Record a reported duration; returns true when this reveals live content
    pub fn observe_duration(&mut self, duration: f64) -> bool {
        let mut became_live = false;
        if let Some(known) = self.known_duration {
            if !self.is_live && known > 0.0 && (duration - known).abs() > f64::EPSILON {
                self.is_live = true;
                became_live = true;
            }
        }

        if duration.is_finite() && duration > 0.0 {
            self.known_duration = Some(duration);
        }
        became_live
    }
}

/// Loaded collection and the active item
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CollectionState {
    pub collection_id: String,
    pub items: Vec<CollectionItem>,
    pub index: usize,
}

impl CollectionState {
    pub fn active(&self) -> Option<&CollectionItem> {
        self.items.get(self.index)
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.items.len()
    }

    pub fn next_index(&self) -> Option<usize> {
        let next = (self.index + 1).min(self.items.len().saturating_sub(1));
        (next != self.index).then_some(next)
    }

    pub fn previous_index(&self) -> Option<usize> {
        let previous = self.index.saturating_sub(1);
        (previous != self.index).then_some(previous)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn info(&self) -> CollectionInfo {
        CollectionInfo {
            collection_id: self.collection_id.clone(),
            items: self.items.clone(),
            index: self.index,
            active: self.active().cloned(),
        }
    }
}

/// Read-only view of the collection for the rendering layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub collection_id: String,
    pub items: Vec<CollectionItem>,
    pub index: usize,
    pub active: Option<CollectionItem>,
}

/// Which collection item to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionTarget {
    Index(usize),
    Id(String),
}

/// Title and description of what is playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentTitle {
    pub title: String,
    pub description: Option<String>,
}

/// Cancelable recovery timers; each slot holds at most one armed timer
#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub stall: Option<CancellationToken>,
    pub buffer_full: Option<CancellationToken>,
    pub reload: Option<CancellationToken>,
    pub autoplay: Option<CancellationToken>,
}

impl Timers {
    /// Cancel the stall and buffer-full watchers
    pub fn cancel_recovery(&mut self) {
        for token in [self.stall.take(), self.buffer_full.take()].into_iter().flatten() {
            token.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_recovery();
        for token in [self.reload.take(), self.autoplay.take()].into_iter().flatten() {
            token.cancel();
        }
    }
}
