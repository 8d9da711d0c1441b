//! Test doubles for the session's external collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use fabric_player_core::engine::{Engine, EngineConfig, EngineEvent, EngineFactory, EventSender};
use fabric_player_core::negotiation::{DeviceCapabilities, OfferMatrix, PlayoutMethod};
use fabric_player_core::resolver::{CatalogRef, CollectionItem, ContentResolver, OfferingRequest};
use fabric_player_core::sink::{MediaSink, PlayError};
use fabric_player_core::{
    Collaborators, Drm, Error, LevelSelection, PlaybackParameters, PlaybackSession, Protocol, QualityLevel, Result,
    SessionCallbacks, SessionPhase, SettingsChange, TrackInfo,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

pub const PLAYLIST_URL: &str = "https://cdn.example.com/hq__abc/playlist.m3u8";

/// Let spawned tasks run until the runtime is idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn hls_clear_offers() -> OfferMatrix {
    let mut offers = OfferMatrix::default();
    offers.insert(
        Protocol::Hls,
        Drm::Clear,
        PlayoutMethod {
            playout_url: PLAYLIST_URL.into(),
            drms: HashMap::new(),
        },
    );
    offers
}

pub fn vod_params() -> PlaybackParameters {
    let mut params = PlaybackParameters::default();
    params.source_options.playout_parameters.object_id = Some("iq__abc".into());
    params
}

// Content resolution

pub struct MockResolver {
    pub offers: Mutex<OfferMatrix>,
    /// Returned, in order, by the next offering requests
    pub failures: Mutex<VecDeque<Error>>,
    /// When set, offering requests wait for a notification
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub permission_message: Mutex<Option<String>>,
    pub collection: Mutex<Vec<CollectionItem>>,
    pub requests: Mutex<Vec<OfferingRequest>>,
    pub region_resets: AtomicU32,
}

impl MockResolver {
    pub fn new(offers: OfferMatrix) -> Self {
        Self {
            offers: Mutex::new(offers),
            failures: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            permission_message: Mutex::new(None),
            collection: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            region_resets: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, error: Error) {
        self.failures.lock().push_back(error);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_version_hash(&self) -> Option<String> {
        self.requests.lock().last().and_then(|request| request.version_hash.clone())
    }
}

#[async_trait]
impl ContentResolver for MockResolver {
    async fn resolve_offering(&self, request: &OfferingRequest) -> Result<OfferMatrix> {
        self.requests.lock().push(request.clone());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        Ok(self.offers.lock().clone())
    }

    async fn resolve_permission_message(&self, _request: &OfferingRequest) -> Result<Option<String>> {
        Ok(self.permission_message.lock().clone())
    }

    async fn resolve_collection_items(&self, _catalog: &CatalogRef, _collection_id: &str) -> Result<Vec<CollectionItem>> {
        Ok(self.collection.lock().clone())
    }

    async fn reset_region(&self) -> Result<()> {
        self.region_resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Engines

#[derive(Default)]
pub struct EngineCounters {
    pub created: AtomicU32,
    pub destroyed: AtomicU32,
    pub live: AtomicU32,
    pub max_live: AtomicU32,
    pub recover_calls: AtomicU32,
}

pub struct MockEngineFactory {
    pub counters: Arc<EngineCounters>,
    pub senders: Mutex<Vec<EventSender>>,
    pub configs: Mutex<Vec<EngineConfig>>,
    pub levels: Vec<QualityLevel>,
    pub fail_create: AtomicBool,
    /// When set, engine construction waits for a notification
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(EngineCounters::default()),
            senders: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            levels: vec![
                QualityLevel {
                    index: 0,
                    bitrate: 800_000,
                    resolution: None,
                    audio_only: false,
                },
                QualityLevel {
                    index: 1,
                    bitrate: 2_500_000,
                    resolution: None,
                    audio_only: false,
                },
            ],
            fail_create: AtomicBool::new(false),
            gate: Mutex::new(None),
        }
    }

    pub fn created(&self) -> u32 {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u32 {
        self.counters.destroyed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> u32 {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> u32 {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn recover_calls(&self) -> u32 {
        self.counters.recover_calls.load(Ordering::SeqCst)
    }

    /// Emit from the most recently created engine
    pub fn emit(&self, event: EngineEvent) {
        if let Some(sender) = self.senders.lock().last() {
            let _ = sender.send(event);
        }
    }

    /// Emit from the engine created `nth` (zero-based)
    pub fn emit_from(&self, nth: usize, event: EngineEvent) {
        if let Some(sender) = self.senders.lock().get(nth) {
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create(&self, config: EngineConfig, events: EventSender) -> Result<Box<dyn Engine>> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Engine("engine unavailable".into()));
        }

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        self.configs.lock().push(config);
        self.senders.lock().push(events);

        Ok(Box::new(MockEngine {
            counters: Arc::clone(&self.counters),
            levels: Mutex::new(self.levels.clone()),
            level: Mutex::new(LevelSelection::Auto),
            destroyed: AtomicBool::new(false),
        }))
    }
}

pub struct MockEngine {
    counters: Arc<EngineCounters>,
    levels: Mutex<Vec<QualityLevel>>,
    level: Mutex<LevelSelection>,
    destroyed: AtomicBool,
}

impl Engine for MockEngine {
    fn load_source(&self, _url: &Url) -> Result<()> {
        Ok(())
    }

    fn attach_sink(&self, _sink: Arc<dyn MediaSink>) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn levels(&self) -> Vec<QualityLevel> {
        self.levels.lock().clone()
    }

    fn remove_level(&self, index: usize) {
        let mut levels = self.levels.lock();
        if index < levels.len() {
            levels.remove(index);
        }
    }

    fn set_start_level(&self, _index: usize) {}

    fn current_level(&self) -> Option<usize> {
        match *self.level.lock() {
            LevelSelection::Auto => Some(0),
            LevelSelection::Level(index) => Some(index),
        }
    }

    fn auto_level_enabled(&self) -> bool {
        *self.level.lock() == LevelSelection::Auto
    }

    fn set_level(&self, selection: LevelSelection) {
        *self.level.lock() = selection;
    }

    fn audio_tracks(&self) -> Vec<TrackInfo> {
        Vec::new()
    }

    fn set_audio_track(&self, _index: usize) {}

    fn text_tracks(&self) -> Vec<TrackInfo> {
        Vec::new()
    }

    fn set_text_track(&self, _index: Option<usize>) {}

    fn recover_media_error(&self) {
        self.counters.recover_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// Media sink

#[derive(Debug, Clone)]
pub struct SinkState {
    pub paused: bool,
    pub time: f64,
    pub volume: f64,
    pub muted: bool,
    pub rate: f64,
    pub source: Option<Url>,
    pub text_tracks: Vec<TrackInfo>,
}

pub struct MockSink {
    pub state: Mutex<SinkState>,
    /// Reject unmuted play requests as the browser does without a gesture
    pub gesture_required: AtomicBool,
    pub play_calls: AtomicU32,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                paused: true,
                time: 0.0,
                volume: 1.0,
                muted: false,
                rate: 1.0,
                source: None,
                text_tracks: Vec::new(),
            }),
            gesture_required: AtomicBool::new(false),
            play_calls: AtomicU32::new(0),
        }
    }

    /// Simulate playback running at `time`
    pub fn playing_at(&self, time: f64) {
        let mut state = self.state.lock();
        state.paused = false;
        state.time = time;
    }

    /// Move the playhead without touching the paused state
    pub fn reset_time(&self, time: f64) {
        self.state.lock().time = time;
    }

    pub fn snapshot(&self) -> SinkState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl MediaSink for MockSink {
    async fn play(&self) -> std::result::Result<(), PlayError> {
        self.play_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if self.gesture_required.load(Ordering::SeqCst) && !state.muted {
            return Err(PlayError::GestureRequired);
        }
        state.paused = false;
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn set_current_time(&self, seconds: f64) {
        self.state.lock().time = seconds;
    }

    fn duration(&self) -> f64 {
        f64::NAN
    }

    fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume;
    }

    fn muted(&self) -> bool {
        self.state.lock().muted
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn set_playback_rate(&self, rate: f64) {
        self.state.lock().rate = rate;
    }

    fn set_source(&self, url: Option<&Url>) {
        self.state.lock().source = url.cloned();
    }

    fn text_tracks(&self) -> Vec<TrackInfo> {
        self.state.lock().text_tracks.clone()
    }

    fn set_text_track(&self, index: Option<usize>) {
        let mut state = self.state.lock();
        for track in state.text_tracks.iter_mut() {
            track.active = Some(track.index as usize) == index;
        }
    }
}

// Harness

pub struct Harness {
    pub session: PlaybackSession,
    pub resolver: Arc<MockResolver>,
    pub engines: Arc<MockEngineFactory>,
    pub sink: Arc<MockSink>,
    /// Every phase published on the settings bus, in order
    pub phases: Arc<Mutex<Vec<SessionPhase>>>,
}

impl Harness {
    pub fn new(params: PlaybackParameters) -> Self {
        Self::with_callbacks(params, SessionCallbacks::default())
    }

    pub fn with_callbacks(params: PlaybackParameters, callbacks: SessionCallbacks) -> Self {
        let resolver = Arc::new(MockResolver::new(hls_clear_offers()));
        let engines = Arc::new(MockEngineFactory::new());
        let sink = Arc::new(MockSink::new());

        let session = PlaybackSession::new(
            params,
            Collaborators {
                resolver: resolver.clone(),
                engines: engines.clone(),
                sink: sink.clone(),
                device: DeviceCapabilities::new([Drm::Widevine]),
            },
            callbacks,
        );

        let phases = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&phases);
        // Lives as long as the session's bus
        let _subscription = session.subscribe(move |change| {
            if let SettingsChange::Phase(phase) = change {
                recorded.lock().push(*phase);
            }
        });

        Self {
            session,
            resolver,
            engines,
            sink,
            phases,
        }
    }

    /// Start and report the first frame
    pub async fn start_playing(&self) {
        self.session.start().await.expect("session should start");
        self.engines.emit(EngineEvent::FirstFrame);
        settle().await;
        assert_eq!(self.session.phase(), SessionPhase::Playing);
    }

    pub fn phase_count(&self, phase: SessionPhase) -> usize {
        self.phases.lock().iter().filter(|p| **p == phase).count()
    }
}
