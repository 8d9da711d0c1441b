//! Playback Session - Main orchestrator for playback
//!
//! Coordinates:
//! - Collection resolution and content resolution
//! - Protocol / DRM negotiation
//! - Engine attachment (at most one engine bound to the sink)
//! - Error classification and in-place recovery
//! - Bounded reloads
//!
//! ```text
//!   Created ─▶ ResolvingContent ─▶ Negotiating ─▶ Attaching ─▶ Playing ⇄ Stalled
//!                  ▲                                               │
//!                  └──────────────────── Reloading ◀───────────────┘
//! ```
//!
//! Every phase that awaits rechecks the destroyed flag before touching shared
//! state or the engine slot. Engine events carry the generation of the engine
//! that produced them and are dropped once that engine is gone.

mod state;

pub use state::{CollectionInfo, CollectionTarget, ContentTitle};

use self::state::{CollectionState, SessionState, Timers};
use crate::bus::{SettingsBus, SettingsChange, Subscription};
use crate::casting;
use crate::classify::{ErrorClassifier, ErrorKind, ErrorRecord, RawError};
use crate::engine::{self, AttachOptions, EngineAdapter, EngineEvent, EngineFactory, EngineKind, EventReceiver, PlayerProfile};
use crate::negotiation::{DeviceCapabilities, NegotiationResult};
use crate::params::{AutoplayMode, ContentType, MutedMode, PlaybackParameters};
use crate::reload::{run_reload, RecoveryPolicy, ReloadCause, ReloadController, ReloadDecision, ReloadOutcome, ReloadState, ReloadTarget, RestartHook};
use crate::resolver::{CatalogRef, ContentResolver, OfferingRequest, VerificationResult};
use crate::sink::{MediaSink, PlayError};
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Message shown for permission failures without a content-specific message
pub const PERMISSION_MESSAGE: &str = "Insufficient permissions";

/// Message shown for terminal failures without a better description
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

pub type ErrorCallback = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;
pub type ReadyCallback = Arc<dyn Fn(&PlaybackSession) + Send + Sync>;

/// Host hooks into the session lifecycle
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    /// Invoked for every classified error, whether or not recovery follows
    pub on_error: Option<ErrorCallback>,
    /// Consulted before each reload; may abort it
    pub restart_hook: Option<Arc<dyn RestartHook>>,
    /// Invoked after each successful engine attachment
    pub on_ready: Option<ReadyCallback>,
}

/// External collaborators a session drives
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn ContentResolver>,
    pub engines: Arc<dyn EngineFactory>,
    pub sink: Arc<dyn MediaSink>,
    pub device: DeviceCapabilities,
}

/// Handle to one playback session; clones share the session
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    params: PlaybackParameters,
    policy: RecoveryPolicy,
    resolver: Arc<dyn ContentResolver>,
    engines: Arc<dyn EngineFactory>,
    sink: Arc<dyn MediaSink>,
    device: DeviceCapabilities,
    callbacks: SessionCallbacks,
    bus: SettingsBus,
    phase_tx: watch::Sender<SessionPhase>,
    state: Mutex<SessionState>,
    adapter: Mutex<Option<Box<dyn EngineAdapter>>>,
    classifier: Mutex<ErrorClassifier>,
    reload: Mutex<ReloadController>,
    timers: Mutex<Timers>,
    /// Serializes initialization passes
    init_lock: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
    cancel: CancellationToken,
}

impl PlaybackSession {
    /// Create a session; nothing is resolved until [`start`](Self::start)
    pub fn new(params: PlaybackParameters, collaborators: Collaborators, callbacks: SessionCallbacks) -> Self {
        let params = params.normalized();
        let policy = params.player_options.recovery.clone();
        let content = &params.source_options.content_info;
        let state = SessionState::new(
            params.player_options.player_profile,
            params.player_options.hlsjs_options.clone(),
            content.content_type == ContentType::Live,
            content.live_dvr,
        );
        let (phase_tx, _) = watch::channel(SessionPhase::Created);

        let inner = Inner {
            id: SessionId::new(),
            classifier: Mutex::new(ErrorClassifier::new(policy.escalation_threshold)),
            reload: Mutex::new(ReloadController::new(policy.max_reloads)),
            policy,
            resolver: collaborators.resolver,
            engines: collaborators.engines,
            sink: collaborators.sink,
            device: collaborators.device,
            callbacks,
            bus: SettingsBus::new(),
            phase_tx,
            state: Mutex::new(state),
            adapter: Mutex::new(None),
            timers: Mutex::new(Timers::default()),
            init_lock: tokio::sync::Mutex::new(()),
            destroyed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            params,
        };

        Self { inner: Arc::new(inner) }
    }

    /// Validate the parameters and run the first initialization pass
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.inner.params.validate() {
            error!(error = %e, "Invalid playback parameters");
            self.inner.set_error_message(Some(e.to_string()));
            self.inner.set_phase(SessionPhase::Failed);
            return Err(e);
        }

        if self.inner.params.player_options.muted == MutedMode::On {
            self.inner.sink.set_muted(true);
        }

        self.inner.initialize(None).await
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn parameters(&self) -> &PlaybackParameters {
        &self.inner.params
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    /// Watch phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    /// Register a settings listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SettingsChange) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    pub fn settings_bus(&self) -> &SettingsBus {
        &self.inner.bus
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    // Queries

    pub fn negotiation(&self) -> Option<NegotiationResult> {
        self.inner.state.lock().negotiation.clone()
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.inner.state.lock().negotiation.as_ref().map(|n| n.protocol)
    }

    pub fn drm(&self) -> Option<Drm> {
        self.inner.state.lock().negotiation.as_ref().map(|n| n.drm)
    }

    pub fn engine_kind(&self) -> Option<EngineKind> {
        self.inner.adapter.lock().as_ref().map(|adapter| adapter.kind())
    }

    pub fn quality_levels(&self) -> Menu<QualityOption> {
        self.inner.with_adapter(|adapter| adapter.quality_levels()).unwrap_or_default()
    }

    pub fn audio_tracks(&self) -> Menu<TrackInfo> {
        self.inner.with_adapter(|adapter| adapter.audio_tracks()).unwrap_or_default()
    }

    pub fn text_tracks(&self) -> Menu<TrackInfo> {
        self.inner.with_adapter(|adapter| adapter.text_tracks()).unwrap_or_default()
    }

    pub fn playback_rates(&self) -> Menu<f64> {
        let current = self.inner.sink.playback_rate();
        Menu {
            options: PLAYBACK_RATES.to_vec(),
            active: PLAYBACK_RATES.iter().copied().find(|rate| (rate - current).abs() < f64::EPSILON),
        }
    }

    /// Profiles are offered only while the HLS engine is driving playback
    pub fn player_profiles(&self) -> Menu<PlayerProfile> {
        let hls_engine = self
            .inner
            .with_adapter(|adapter| adapter.kind() == EngineKind::Hls && !adapter.is_native())
            .unwrap_or(false);
        if !hls_engine {
            return Menu::default();
        }

        Menu {
            options: PlayerProfile::ALL.to_vec(),
            active: Some(self.inner.state.lock().profile),
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.state.lock().is_live
    }

    pub fn is_dvr(&self) -> bool {
        self.inner.state.lock().dvr
    }

    pub fn casting(&self) -> bool {
        self.inner.state.lock().casting
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.state.lock().error_message.clone()
    }

    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn collection(&self) -> Option<CollectionInfo> {
        self.inner.state.lock().collection.as_ref().map(CollectionState::info)
    }

    pub fn verification(&self) -> Option<VerificationResult> {
        self.inner.state.lock().verification.clone()
    }

    pub fn reload_count(&self) -> u32 {
        self.inner.reload.lock().reloads()
    }

    pub fn reload_state(&self) -> ReloadState {
        self.inner.reload.lock().state()
    }

    /// Title of the active collection item, else of the configured content
    pub fn content_title(&self) -> Option<ContentTitle> {
        let state = self.inner.state.lock();
        if let Some(item) = state.collection.as_ref().and_then(CollectionState::active) {
            return Some(ContentTitle {
                title: item.title.clone().unwrap_or_default(),
                description: item.description.clone(),
            });
        }

        let info = &self.inner.params.source_options.content_info;
        info.title.as_ref().map(|title| ContentTitle {
            title: title.clone(),
            description: info.description.clone(),
        })
    }

    // Commands

    pub async fn play(&self) -> std::result::Result<(), PlayError> {
        self.inner.sink.play().await
    }

    pub fn pause(&self) {
        self.inner.sink.pause();
    }

    pub fn seek(&self, seconds: f64) {
        let target = seconds.max(0.0);
        debug!(to = target, "Seeking");
        self.inner.sink.set_current_time(target);
    }

    pub fn set_volume(&self, volume: f64) {
        self.inner.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.sink.set_muted(muted);
    }

    /// Select a quality level; `-1` restores automatic selection
    pub fn set_quality(&self, index: i32) -> Result<()> {
        self.inner
            .with_adapter(|adapter| adapter.set_quality(LevelSelection::from(index)))
            .ok_or(Error::NotAttached)?;
        self.inner.bus.emit(SettingsChange::Quality);
        Ok(())
    }

    pub fn set_audio_track(&self, index: i32) -> Result<()> {
        self.inner
            .with_adapter(|adapter| adapter.set_audio_track(index))
            .ok_or(Error::NotAttached)?;
        self.inner.bus.emit(SettingsChange::AudioTracks);
        Ok(())
    }

    /// Show a text track; `-1` disables text
    pub fn set_text_track(&self, index: i32) -> Result<()> {
        self.inner
            .with_adapter(|adapter| adapter.set_text_track(index))
            .ok_or(Error::NotAttached)?;
        if index >= 0 {
            self.inner.state.lock().last_text_track = Some(index);
        }
        self.inner.bus.emit(SettingsChange::TextTracks);
        Ok(())
    }

    /// Turn text off, or back on using the last track, a track in one of the
    /// preferred languages, or the first track
    pub fn toggle_text_track(&self, preferred_languages: &[&str]) -> Result<()> {
        let menu = self.text_tracks();
        if menu.options.is_empty() {
            return Ok(());
        }

        if menu.active.as_ref().is_some_and(|track| track.index >= 0) {
            return self.set_text_track(-1);
        }

        if let Some(last) = self.inner.state.lock().last_text_track {
            return self.set_text_track(last);
        }

        let matching = preferred_languages.iter().find_map(|code| {
            let primary = code.split('-').next().unwrap_or(code);
            menu.options.iter().find(|track| {
                track.index >= 0
                    && track
                        .language
                        .as_deref()
                        .is_some_and(|language| language == *code || language == primary)
            })
        });

        self.set_text_track(matching.map(|track| track.index).unwrap_or(0))
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.inner.sink.set_playback_rate(rate);
        self.inner.bus.emit(SettingsChange::PlaybackRate(rate));
    }

    /// Select a rate from [`PLAYBACK_RATES`]; out-of-range indexes are ignored
    pub fn set_playback_rate_index(&self, index: usize) {
        if let Some(rate) = PLAYBACK_RATES.get(index) {
            self.set_playback_rate(*rate);
        }
    }

    /// Recreate the engine with a different profile, keeping position and paused state
    #[instrument(skip(self, custom_hls_options), fields(session_id = %self.inner.id))]
    pub async fn set_profile(&self, profile: PlayerProfile, custom_hls_options: Option<Map<String, Value>>) -> Result<()> {
        self.inner.reconfigure_profile(profile, custom_hls_options).await
    }

    /// Toggle casting; honored only when allowed and a cast framework is present
    pub fn set_casting(&self, casting: bool) -> bool {
        if casting && !(self.inner.params.player_options.allow_casting && casting::cast_available()) {
            debug!("Casting unavailable");
            return false;
        }

        let changed = {
            let mut state = self.inner.state.lock();
            let changed = state.casting != casting;
            state.casting = casting;
            changed
        };
        if changed {
            self.inner.bus.emit(SettingsChange::Casting(casting));
        }
        true
    }

    pub async fn collection_play(&self, target: CollectionTarget) -> Result<()> {
        self.inner.collection_play(target).await
    }

    /// Advance to the next item; a no-op at the end of the collection
    pub async fn collection_next(&self) -> Result<()> {
        let next = self.inner.state.lock().collection.as_ref().and_then(CollectionState::next_index);
        match next {
            Some(index) => self.inner.collection_play(CollectionTarget::Index(index)).await,
            None => Ok(()),
        }
    }

    /// Go back one item; a no-op at the start of the collection
    pub async fn collection_previous(&self) -> Result<()> {
        let previous = self
            .inner
            .state
            .lock()
            .collection
            .as_ref()
            .and_then(CollectionState::previous_index);
        match previous {
            Some(index) => self.inner.collection_play(CollectionTarget::Index(index)).await,
            None => Ok(()),
        }
    }

    /// Feed an event observed on the media sink itself (native playback, ended, duration)
    pub fn handle_media_event(&self, event: EngineEvent) {
        let generation = self.inner.state.lock().generation;
        self.inner.handle_engine_event(generation, event);
    }

    /// Tear the session down; idempotent
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Inner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    fn with_adapter<R>(&self, f: impl FnOnce(&dyn EngineAdapter) -> R) -> Option<R> {
        self.adapter.lock().as_deref().map(f)
    }

    fn set_phase(&self, phase: SessionPhase) {
        let changed = {
            let mut state = self.state.lock();
            if state.phase == phase {
                false
            } else if !state.phase.can_transition_to(phase) {
                debug!(from = %state.phase, to = %phase, "Ignoring phase transition");
                false
            } else {
                info!(from = %state.phase, to = %phase, "Phase transition");
                state.phase = phase;
                true
            }
        };

        if changed {
            self.phase_tx.send_replace(phase);
            self.bus.emit(SettingsChange::Phase(phase));
        }
    }

    fn set_error_message(&self, message: Option<String>) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.error_message != message;
            state.error_message = message.clone();
            changed
        };
        if changed {
            self.bus.emit(SettingsChange::ErrorMessage(message));
        }
    }

    fn offering_request(&self) -> OfferingRequest {
        let state = self.state.lock();
        let active_hash = state
            .collection
            .as_ref()
            .and_then(CollectionState::active)
            .and_then(|item| item.media_hash());
        OfferingRequest::from_playout(&self.params.source_options.playout_parameters, active_hash)
    }

    fn attach_options(&self) -> AttachOptions {
        let mut options = AttachOptions::from_params(&self.params);
        let state = self.state.lock();
        options.profile = state.profile;
        options.custom_hls_options = state.custom_hls_options.clone();
        options
    }

    /// Detach the current engine, if any, and invalidate its events
    fn teardown_engine(&self) {
        let adapter = self.adapter.lock().take();
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.first_frame_seen = false;
            state.media_recovery_attempted = false;
        }

        if let Some(mut adapter) = adapter {
            self.sink.pause();
            adapter.detach();
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(session_id = %self.id, "Destroying session");
        self.cancel.cancel();
        self.timers.lock().cancel_all();
        self.teardown_engine();
        self.set_phase(SessionPhase::Destroyed);
    }

    fn notify_error(&self, record: &ErrorRecord) {
        self.state.lock().last_error = Some(record.clone());
        if let Some(callback) = &self.callbacks.on_error {
            callback(record);
        }
    }

    // Initialization

    async fn initialize(self: &Arc<Self>, restore: Option<ResumeSnapshot>) -> Result<()> {
        match self.initialize_pass(restore).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.handle_init_failure(&e).await;
                Err(e)
            }
        }
    }

    /// One resolution, negotiation and attachment pass
    #[instrument(skip_all, fields(session_id = %self.id))]
    async fn initialize_pass(self: &Arc<Self>, restore: Option<ResumeSnapshot>) -> Result<()> {
        let _pass = self.init_lock.lock().await;
        self.ensure_alive()?;

        // The previous engine is always gone before a new one is constructed
        self.teardown_engine();
        self.timers.lock().cancel_recovery();

        self.set_phase(SessionPhase::ResolvingContent);
        self.load_collection().await?;
        self.ensure_alive()?;

        self.set_phase(SessionPhase::Negotiating);
        let request = self.offering_request();
        let offers = self.resolver.resolve_offering(&request).await?;
        self.ensure_alive()?;

        let source = &self.params.source_options;
        let negotiation = NegotiationResult::resolve(&offers, &source.protocols, &source.drms, &self.device)?;
        info!(protocol = %negotiation.protocol, drm = %negotiation.drm, "Negotiated playout");

        let (live, dvr) = {
            let mut state = self.state.lock();
            state.negotiation = Some(negotiation.clone());
            (state.is_live, state.dvr)
        };
        self.bus.emit(SettingsChange::Live { live, dvr });

        if self.params.player_options.verify_content {
            self.spawn_verification(request);
        }

        self.set_phase(SessionPhase::Attaching);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let options = self.attach_options();
        let mut adapter = engine::attach(
            self.engines.as_ref(),
            &negotiation,
            Arc::clone(&self.sink),
            &options,
            events_tx,
        )
        .await?;

        if self.is_destroyed() {
            adapter.detach();
            return Err(Error::Destroyed);
        }

        if let Some(snapshot) = &restore {
            self.sink.set_muted(snapshot.muted);
            self.sink.set_volume(snapshot.volume);
        }

        let generation = {
            let mut state = self.state.lock();
            state.pending_restore = restore;
            state.generation
        };
        *self.adapter.lock() = Some(adapter);
        self.spawn_event_pump(generation, events_rx);

        self.set_error_message(None);
        self.bus.emit(SettingsChange::Manifest);

        if let Some(on_ready) = &self.callbacks.on_ready {
            on_ready(&PlaybackSession { inner: Arc::clone(self) });
        }

        Ok(())
    }

    async fn load_collection(&self) -> Result<()> {
        let Some(options) = self.params.source_options.media_collection_options.as_ref() else {
            return Ok(());
        };
        let Some(collection_id) = options.collection_id.as_deref() else {
            return Ok(());
        };
        if self.state.lock().collection.is_some() {
            return Ok(());
        }

        let catalog = CatalogRef::from_options(options).ok_or_else(|| {
            Error::InvalidParameters("Invalid collection options: Media catalog not specified".into())
        })?;

        let items: Vec<_> = self
            .resolver
            .resolve_collection_items(&catalog, collection_id)
            .await?
            .into_iter()
            .filter(|item| item.media_hash().is_some())
            .collect();

        if items.is_empty() {
            return Err(Error::Collection(format!(
                "No collection with ID {collection_id} found for media catalog {}",
                catalog.display_id()
            )));
        }

        info!(collection_id, items = items.len(), "Loaded collection");
        self.state.lock().collection = Some(CollectionState {
            collection_id: collection_id.to_string(),
            items,
            index: 0,
        });
        self.bus.emit(SettingsChange::Collection);
        Ok(())
    }

    fn spawn_verification(self: &Arc<Self>, request: OfferingRequest) {
        let weak = Arc::downgrade(self);
        let resolver = Arc::clone(&self.resolver);
        tokio::spawn(async move {
            let result = resolver.verify_content(&request).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.is_destroyed() {
                return;
            }

            match result {
                Ok(verification) => {
                    info!(verified = verification.verified, "Content verification finished");
                    inner.state.lock().verification = Some(verification);
                    inner.bus.emit(SettingsChange::Verification);
                }
                Err(e) => warn!(error = %e, "Content verification failed"),
            }
        });
    }

    fn spawn_event_pump(self: &Arc<Self>, generation: u64, mut events: EventReceiver) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let (Some(event), Some(inner)) = (event, weak.upgrade()) else {
                    break;
                };
                inner.handle_engine_event(generation, event);
            }
        });
    }

    /// Route a failed initialization pass through the classifier
    async fn handle_init_failure(self: &Arc<Self>, error: &Error) {
        if matches!(error, Error::Destroyed) || self.is_destroyed() {
            return;
        }

        let record = self.classifier.lock().classify(RawError::from_error(error));
        warn!(error = %error, kind = %record.kind, "Initialization failed");
        self.notify_error(&record);

        match record.kind {
            ErrorKind::Permission => self.handle_permission(record).await,
            ErrorKind::ServerError => self.request_reload(record, ReloadCause::ServerError),
            _ => {
                self.teardown_engine();
                let message = match error {
                    Error::NoPlayableCombination | Error::Collection(_) | Error::InvalidParameters(_) => error.to_string(),
                    _ => GENERIC_ERROR_MESSAGE.to_string(),
                };
                self.set_error_message(Some(message));
                self.set_phase(SessionPhase::Failed);
            }
        }
    }

    async fn handle_permission(self: &Arc<Self>, record: ErrorRecord) {
        self.timers.lock().cancel_recovery();
        self.teardown_engine();
        self.set_phase(SessionPhase::Failed);

        let request = self.offering_request();
        let message = match self.resolver.resolve_permission_message(&request).await {
            Ok(Some(message)) => message,
            Ok(None) => record.raw.message.clone().unwrap_or_else(|| PERMISSION_MESSAGE.to_string()),
            Err(e) => {
                debug!(error = %e, "Permission message unavailable");
                PERMISSION_MESSAGE.to_string()
            }
        };

        if !self.is_destroyed() {
            self.set_error_message(Some(message));
        }
    }

    // Engine events

    fn handle_engine_event(self: &Arc<Self>, generation: u64, event: EngineEvent) {
        if self.is_destroyed() || self.state.lock().generation != generation {
            debug!(?event, "Dropping event from a detached engine");
            return;
        }

        if let Some(adapter) = self.adapter.lock().as_mut() {
            adapter.on_event(&event);
        }

        match event {
            EngineEvent::ManifestParsed { .. } => {
                self.bus.emit(SettingsChange::Manifest);
                self.bus.emit(SettingsChange::Quality);
            }
            EngineEvent::LevelSwitched(_) => self.bus.emit(SettingsChange::Quality),
            EngineEvent::AudioTracksUpdated => self.bus.emit(SettingsChange::AudioTracks),
            EngineEvent::TextTracksUpdated => self.bus.emit(SettingsChange::TextTracks),
            EngineEvent::FragmentLoaded => {
                self.classifier.lock().reset();
                if let Some(token) = self.timers.lock().buffer_full.take() {
                    token.cancel();
                }
            }
            EngineEvent::FirstFrame => self.on_first_frame(),
            EngineEvent::DurationChanged(duration) => {
                let update = {
                    let mut state = self.state.lock();
                    state.observe_duration(duration).then_some((state.is_live, state.dvr))
                };
                if let Some((live, dvr)) = update {
                    info!("Duration changed after load, treating content as live");
                    self.bus.emit(SettingsChange::Live { live, dvr });
                }
            }
            EngineEvent::Ended => {
                let advance = self
                    .state
                    .lock()
                    .collection
                    .as_ref()
                    .is_some_and(|collection| !collection.is_last());
                if advance {
                    let session = PlaybackSession { inner: Arc::clone(self) };
                    tokio::spawn(async move {
                        if let Err(e) = session.collection_next().await {
                            warn!(error = %e, "Failed to advance collection");
                        }
                    });
                }
            }
            EngineEvent::Error(raw) => self.handle_error(raw),
        }
    }

    fn on_first_frame(self: &Arc<Self>) {
        let (restore, live, autoplay) = {
            let mut state = self.state.lock();
            if state.first_frame_seen {
                return;
            }
            state.first_frame_seen = true;

            let autoplay = !state.initial_autoplay_done && self.params.player_options.autoplay == AutoplayMode::On;
            state.initial_autoplay_done = true;
            (state.pending_restore.take(), state.is_live, autoplay)
        };

        self.classifier.lock().reset();
        self.set_phase(SessionPhase::Playing);
        self.set_error_message(None);

        match restore {
            Some(snapshot) => {
                if let (false, Some(time)) = (live, snapshot.current_time) {
                    self.sink.set_current_time(time);
                }
                if snapshot.playing {
                    self.spawn_play(false);
                } else {
                    self.sink.pause();
                }
            }
            None if autoplay => self.spawn_play(true),
            None => {}
        }
    }

    /// Start playback; an autoplay blocked for lack of a gesture may retry muted once
    fn spawn_play(self: &Arc<Self>, autoplay: bool) {
        let token = self.cancel.child_token();
        if let Some(previous) = self.timers.lock().autoplay.replace(token.clone()) {
            previous.cancel();
        }

        let fallback = autoplay && self.params.player_options.muted == MutedMode::OffIfPossible;
        let delay = self.policy.muted_autoplay_delay();
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            match sink.play().await {
                Ok(()) => {}
                Err(PlayError::GestureRequired) if fallback => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return,
                    }
                    if sink.is_paused() && !sink.muted() {
                        info!("Autoplay blocked, retrying muted");
                        sink.set_muted(true);
                        if let Err(e) = sink.play().await {
                            debug!(error = %e, "Muted autoplay also blocked");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Play request rejected"),
            }
        });
    }

    // Error handling

    fn handle_error(self: &Arc<Self>, raw: RawError) {
        let record = self.classifier.lock().classify(raw);
        match record.kind {
            ErrorKind::Unknown => debug!(details = %record.raw.details, "Engine error"),
            kind => warn!(
                kind = %kind,
                details = %record.raw.details,
                fatal = record.fatal,
                escalated = record.escalated,
                "Engine error"
            ),
        }
        self.notify_error(&record);

        match record.kind {
            ErrorKind::Permission => {
                let inner = Arc::clone(self);
                tokio::spawn(async move { inner.handle_permission(record).await });
            }
            ErrorKind::ServerError => self.request_reload(record, ReloadCause::ServerError),
            ErrorKind::Fatal => self.request_reload(record, ReloadCause::Fatal),
            ErrorKind::FatalRecoverable => self.recover_in_place(record),
            ErrorKind::TransientStall => self.watch_stall(record, false),
            ErrorKind::Unknown if record.raw.is_buffer_full() => self.arm_buffer_full(record),
            ErrorKind::Unknown => {}
        }
    }

    fn recover_in_place(self: &Arc<Self>, record: ErrorRecord) {
        let already_attempted = std::mem::replace(&mut self.state.lock().media_recovery_attempted, true);
        if already_attempted {
            self.request_reload(record, ReloadCause::Fatal);
            return;
        }

        info!("Attempting in-place media error recovery");
        if self.with_adapter(|adapter| adapter.recover_media_error()) != Some(true) {
            self.request_reload(record, ReloadCause::Fatal);
            return;
        }
        self.watch_stall(record, true);
    }

    /// Observe playback progress; escalate to a reload if it never resumes.
    ///
    /// Without a prior in-place recovery, one is attempted after the first window.
    fn watch_stall(self: &Arc<Self>, record: ErrorRecord, recovered: bool) {
        if self.reload.lock().is_busy() {
            return;
        }

        let token = {
            let mut timers = self.timers.lock();
            if timers.stall.is_some() {
                return;
            }
            let token = self.cancel.child_token();
            timers.stall = Some(token.clone());
            token
        };

        self.set_phase(SessionPhase::Stalled);
        let inner = Arc::clone(self);
        let window = self.policy.stall_window();
        let resume_at = self.sink.current_time();

        tokio::spawn(async move {
            if !recovered {
                tokio::select! {
                    _ = tokio::time::sleep(window) => {}
                    _ = token.cancelled() => return,
                }
                if inner.is_destroyed() {
                    return;
                }
                if inner.progressed_since(resume_at) {
                    inner.stall_cleared();
                    return;
                }

                info!("Playback stalled, attempting in-place recovery");
                inner.state.lock().media_recovery_attempted = true;
                inner.with_adapter(|adapter| adapter.recover_media_error());
            }

            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = token.cancelled() => return,
            }
            if inner.is_destroyed() {
                return;
            }
            if inner.progressed_since(resume_at) {
                inner.stall_cleared();
                return;
            }

            warn!(resume_at, "Playback still stalled after recovery");
            inner.timers.lock().stall = None;
            inner.request_reload(record, ReloadCause::Stall { resume_at });
        });
    }

    fn progressed_since(&self, time: f64) -> bool {
        self.sink.is_paused() || self.sink.current_time() > time
    }

    fn stall_cleared(&self) {
        debug!("Playback progressed, stall cleared");
        self.timers.lock().stall = None;
        self.state.lock().media_recovery_attempted = false;
        self.set_phase(SessionPhase::Playing);
    }

    fn arm_buffer_full(self: &Arc<Self>, record: ErrorRecord) {
        let token = {
            let mut timers = self.timers.lock();
            if timers.buffer_full.is_some() {
                return;
            }
            let token = self.cancel.child_token();
            timers.buffer_full = Some(token.clone());
            token
        };

        let inner = Arc::clone(self);
        let grace = self.policy.buffer_full_grace();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = token.cancelled() => return,
            }
            if inner.is_destroyed() {
                return;
            }
            warn!("Buffer still full, reloading");
            inner.timers.lock().buffer_full = None;
            inner.request_reload(record, ReloadCause::BufferFull);
        });
    }

    fn request_reload(self: &Arc<Self>, record: ErrorRecord, cause: ReloadCause) {
        if self.is_destroyed() {
            return;
        }

        let decision = self.reload.lock().request(&cause, &self.policy);
        match decision {
            ReloadDecision::Scheduled { delay } => {
                let token = self.cancel.child_token();
                {
                    let mut timers = self.timers.lock();
                    timers.cancel_recovery();
                    timers.reload = Some(token.clone());
                }
                self.set_phase(SessionPhase::Reloading);
                info!(delay_ms = delay.as_millis() as u64, ?cause, "Reload scheduled");

                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let hook = inner.callbacks.restart_hook.clone();
                    let outcome = run_reload(&inner.reload, &inner, &record, cause, delay, hook.as_deref(), &token).await;
                    inner.timers.lock().reload = None;

                    if let ReloadOutcome::Failed(e) = outcome {
                        inner.handle_init_failure(&e).await;
                    }
                });
            }
            ReloadDecision::Swallowed => debug!(kind = %record.kind, "Reload already pending or in flight"),
            ReloadDecision::Exhausted => {
                let error = Error::ReloadsExhausted(self.policy.max_reloads);
                error!(error = %error, "Giving up on recovery");
                self.timers.lock().cancel_recovery();
                self.teardown_engine();
                self.set_error_message(Some(error.to_string()));
                self.set_phase(SessionPhase::Failed);
            }
        }
    }

    // Commands

    async fn collection_play(self: &Arc<Self>, target: CollectionTarget) -> Result<()> {
        self.ensure_alive()?;

        let index = {
            let mut state = self.state.lock();
            let collection = state
                .collection
                .as_mut()
                .ok_or_else(|| Error::Collection("no collection loaded".into()))?;
            let index = match &target {
                CollectionTarget::Index(index) => *index,
                CollectionTarget::Id(id) => collection
                    .position_of(id)
                    .ok_or_else(|| Error::Collection(format!("no item with ID {id}")))?,
            };
            if index >= collection.items.len() {
                return Err(Error::Collection(format!("item index {index} out of range")));
            }
            collection.index = index;
            index
        };

        info!(index, "Playing collection item");
        self.bus.emit(SettingsChange::Collection);

        let snapshot = ResumeSnapshot {
            muted: self.sink.muted(),
            volume: self.sink.volume(),
            current_time: None,
            playing: !self.sink.is_paused(),
        };
        self.initialize(Some(snapshot)).await
    }

    async fn reconfigure_profile(
        self: &Arc<Self>,
        profile: PlayerProfile,
        custom_hls_options: Option<Map<String, Value>>,
    ) -> Result<()> {
        let _pass = self.init_lock.lock().await;
        self.ensure_alive()?;

        let hls_engine = self
            .with_adapter(|adapter| adapter.kind() == EngineKind::Hls && !adapter.is_native())
            .unwrap_or(false);

        let (negotiation, live) = {
            let mut state = self.state.lock();
            state.profile = profile;
            state.custom_hls_options = custom_hls_options;
            state.known_duration = None;
            (state.negotiation.clone(), state.is_live)
        };
        self.bus.emit(SettingsChange::Profile(profile));

        if !hls_engine {
            debug!(%profile, "No HLS engine attached, profile applies on next attach");
            return Ok(());
        }
        let negotiation = negotiation.ok_or(Error::NotAttached)?;
        let snapshot = ResumeSnapshot {
            muted: self.sink.muted(),
            volume: self.sink.volume(),
            current_time: (!live).then(|| self.sink.current_time()),
            playing: !self.sink.is_paused(),
        };

        info!(%profile, "Reconfiguring engine profile");
        self.teardown_engine();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let options = self.attach_options();
        let mut adapter = engine::attach(
            self.engines.as_ref(),
            &negotiation,
            Arc::clone(&self.sink),
            &options,
            events_tx,
        )
        .await?;

        if self.is_destroyed() {
            adapter.detach();
            return Err(Error::Destroyed);
        }

        let generation = {
            let mut state = self.state.lock();
            state.pending_restore = Some(snapshot);
            state.generation
        };
        *self.adapter.lock() = Some(adapter);
        self.spawn_event_pump(generation, events_rx);
        self.bus.emit(SettingsChange::Quality);
        Ok(())
    }
}

#[async_trait]
impl ReloadTarget for Arc<Inner> {
    fn is_destroyed(&self) -> bool {
        Inner::is_destroyed(self)
    }

    fn capture_snapshot(&self) -> Option<ResumeSnapshot> {
        Some(ResumeSnapshot {
            muted: self.sink.muted(),
            volume: self.sink.volume(),
            current_time: Some(self.sink.current_time()),
            playing: !self.sink.is_paused(),
        })
    }

    fn show_message(&self, message: Option<String>) {
        self.set_error_message(message);
    }

    fn abort(&self) {
        Inner::destroy(self);
    }

    async fn reset_region(&self) {
        if let Err(e) = self.resolver.reset_region().await {
            warn!(error = %e, "Failed to reset region");
        }
    }

    async fn reinitialize(&self, snapshot: Option<ResumeSnapshot>) -> Result<()> {
        self.initialize_pass(snapshot).await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.cancel.cancel();
            if let Some(mut adapter) = self.adapter.get_mut().take() {
                adapter.detach();
            }
        }
    }
}
