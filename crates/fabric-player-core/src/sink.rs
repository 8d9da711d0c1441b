//! Media sink collaborator
//!
//! The single output surface (a video element in a browser host) an engine
//! renders into. Only the session mutates it.

use crate::types::TrackInfo;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Why a play request was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    /// The host blocks unmuted playback without a user gesture
    #[error("playback requires a user gesture")]
    GestureRequired,
    #[error("playback failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn play(&self) -> Result<(), PlayError>;

    fn pause(&self);

    fn is_paused(&self) -> bool;

    /// Playback position in seconds
    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);

    /// Media duration in seconds; infinite or NaN before metadata
    fn duration(&self) -> f64;

    fn volume(&self) -> f64;

    fn set_volume(&self, volume: f64);

    fn muted(&self) -> bool;

    fn set_muted(&self, muted: bool);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    /// Point the sink directly at a URL (native playback); `None` clears it
    fn set_source(&self, url: Option<&Url>);

    /// Audio tracks decoded natively by the sink
    fn audio_tracks(&self) -> Vec<TrackInfo> {
        Vec::new()
    }

    fn set_audio_track(&self, _index: usize) {}

    /// Text tracks decoded natively by the sink
    fn text_tracks(&self) -> Vec<TrackInfo> {
        Vec::new()
    }

    /// Show the given text track, or hide all for `None`
    fn set_text_track(&self, _index: Option<usize>) {}
}
