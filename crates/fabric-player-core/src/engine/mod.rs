//! Engine adapters for HLS and DASH
//!
//! The adaptive-streaming engines themselves are external collaborators
//! reached through [`Engine`] and [`EngineFactory`]. An [`EngineAdapter`]
//! binds one negotiated playout to one engine instance and gives the session a
//! uniform control surface; the concrete adapter is chosen once from the
//! negotiated protocol.

mod dash;
mod hls;
mod profile;

pub use dash::{dash_settings, DashAdapter};
pub use hls::{levels_to_remove, HlsAdapter, LevelCap};
pub use profile::{hls_settings, merge_json, PlayerProfile};

use crate::classify::RawError;
use crate::negotiation::NegotiationResult;
use crate::params::{AutoplayMode, PlaybackParameters};
use crate::sink::MediaSink;
use crate::types::{LevelSelection, Menu, Protocol, QualityLevel, QualityOption, TrackInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Query parameter some playout URLs carry the bearer token in
pub const AUTHORIZATION_PARAM: &str = "authorization";

/// Which engine family an adapter drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Hls,
    Dash,
}

impl From<Protocol> for EngineKind {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Hls => EngineKind::Hls,
            Protocol::Dash => EngineKind::Dash,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Hls => write!(f, "hls"),
            EngineKind::Dash => write!(f, "dash"),
        }
    }
}

/// Events reported by an engine or by the media sink it renders into
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ManifestParsed {
        levels: Vec<QualityLevel>,
        /// Level the engine intends to start on
        first_level: usize,
    },
    LevelSwitched(usize),
    AudioTracksUpdated,
    TextTracksUpdated,
    FragmentLoaded,
    /// First playable frame
    FirstFrame,
    DurationChanged(f64),
    Ended,
    Error(RawError),
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Headers injected into every engine-issued request
#[derive(Debug, Clone, Default)]
pub struct RequestModifier {
    headers: HeaderMap,
}

impl RequestModifier {
    /// `Authorization: Bearer <token>`, or no headers without a token
    pub fn bearer(token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::InvalidParameters(format!("invalid authorization token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self { headers })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok())
    }

    /// Add the modifier's headers to an outgoing request
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// Pick the bearer token and strip it from the URL handed to the engine
pub fn split_authorization(url: &Url, explicit: Option<&str>) -> (Url, Option<String>) {
    let query_token = url
        .query_pairs()
        .find(|(key, _)| key == AUTHORIZATION_PARAM)
        .map(|(_, value)| value.into_owned());

    let mut stripped = url.clone();
    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != AUTHORIZATION_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if remaining.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(remaining);
    }

    (stripped, explicit.map(str::to_string).or(query_token))
}

/// Everything an engine needs at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Engine-native settings tree
    pub settings: Value,
    pub request_modifier: RequestModifier,
    /// Key system protection data, e.g. `{"com.widevine.alpha": {"serverURL": ...}}`
    pub protection: Option<Value>,
    /// Start playing as soon as the source is ready
    pub autoplay: bool,
}

/// An external adaptive-streaming engine instance
pub trait Engine: Send + Sync {
    fn load_source(&self, url: &Url) -> Result<()>;

    fn attach_sink(&self, sink: Arc<dyn MediaSink>) -> Result<()>;

    /// Release the engine and unbind it from the sink
    fn destroy(&self);

    fn levels(&self) -> Vec<QualityLevel>;

    fn remove_level(&self, index: usize);

    fn set_start_level(&self, index: usize);

    fn current_level(&self) -> Option<usize>;

    fn auto_level_enabled(&self) -> bool;

    fn set_level(&self, selection: LevelSelection);

    fn audio_tracks(&self) -> Vec<TrackInfo>;

    fn set_audio_track(&self, index: usize);

    fn text_tracks(&self) -> Vec<TrackInfo>;

    fn set_text_track(&self, index: Option<usize>);

    /// In-place recovery primitive for decode-class errors
    fn recover_media_error(&self);

    /// Merge a partial settings tree into the running engine
    fn update_settings(&self, _settings: &Value) {}
}

/// Constructs engines; the single place an engine comes into existence
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, config: EngineConfig, events: EventSender) -> Result<Box<dyn Engine>>;

    /// Whether the HLS engine can run here; otherwise HLS plays natively
    fn hls_engine_supported(&self) -> bool {
        true
    }
}

/// Engine-related options taken from the playback parameters
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub authorization_token: Option<String>,
    pub profile: PlayerProfile,
    pub custom_hls_options: Option<Map<String, Value>>,
    pub dash_options: Option<Value>,
    pub max_bitrate: Option<u64>,
    pub cap_level_to_player_size: bool,
    pub prefer_native_hls: bool,
    pub autoplay: bool,
}

impl AttachOptions {
    pub fn from_params(params: &PlaybackParameters) -> Self {
        let player = &params.player_options;
        Self {
            authorization_token: params.source_options.playout_parameters.authorization_token.clone(),
            profile: player.player_profile,
            custom_hls_options: player.hlsjs_options.clone(),
            dash_options: player.dashjs_options.clone(),
            max_bitrate: player.max_bitrate,
            cap_level_to_player_size: player.cap_level_to_player_size,
            prefer_native_hls: player.prefer_native_hls,
            autoplay: player.autoplay == AutoplayMode::On,
        }
    }
}

/// Uniform control surface over the active engine
pub trait EngineAdapter: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// True when the sink plays the URL itself without an engine
    fn is_native(&self) -> bool {
        false
    }

    /// Inspect an engine event before the session handles it
    fn on_event(&mut self, _event: &EngineEvent) {}

    fn quality_levels(&self) -> Menu<QualityOption>;

    fn set_quality(&self, selection: LevelSelection);

    fn audio_tracks(&self) -> Menu<TrackInfo>;

    fn set_audio_track(&self, index: i32);

    /// Text tracks with a leading "Disabled" entry when any exist
    fn text_tracks(&self) -> Menu<TrackInfo>;

    /// Show a text track; a negative index disables text
    fn set_text_track(&self, index: i32);

    /// Run the engine's in-place recovery; false if none exists
    fn recover_media_error(&self) -> bool;

    /// Tear the engine down; idempotent
    fn detach(&mut self);

    fn is_attached(&self) -> bool;
}

/// Construct the adapter for a negotiated playout and bind it to the sink
pub async fn attach(
    factory: &dyn EngineFactory,
    negotiation: &NegotiationResult,
    sink: Arc<dyn MediaSink>,
    options: &AttachOptions,
    events: EventSender,
) -> Result<Box<dyn EngineAdapter>> {
    match EngineKind::from(negotiation.protocol) {
        EngineKind::Hls => Ok(Box::new(HlsAdapter::attach(factory, negotiation, sink, options, events).await?)),
        EngineKind::Dash => Ok(Box::new(DashAdapter::attach(factory, negotiation, sink, options, events).await?)),
    }
}

/// Prepend the "Disabled" entry to a text track list
pub(crate) fn text_menu(tracks: Vec<TrackInfo>) -> Menu<TrackInfo> {
    if tracks.is_empty() {
        return Menu::default();
    }

    let any_active = tracks.iter().any(|track| track.active);
    let mut options = Vec::with_capacity(tracks.len() + 1);
    options.push(TrackInfo::new(-1, "Disabled", None, !any_active));
    options.extend(tracks);

    let active = options.iter().find(|track| track.active).cloned();
    Menu { options, active }
}

pub(crate) fn track_menu(tracks: Vec<TrackInfo>) -> Menu<TrackInfo> {
    let active = tracks.iter().find(|track| track.active).cloned();
    Menu { options: tracks, active }
}
