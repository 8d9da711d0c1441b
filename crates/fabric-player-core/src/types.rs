//! Core types for Fabric Player

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery protocols a playout offer can be made in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Hls,
    Dash,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Hls => write!(f, "hls"),
            Protocol::Dash => write!(f, "dash"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hls" => Ok(Protocol::Hls),
            "dash" => Ok(Protocol::Dash),
            other => Err(crate::Error::InvalidParameters(format!("unknown protocol '{other}'"))),
        }
    }
}

/// Content protection schemes, including the `clear` sentinel for unprotected playout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Drm {
    #[serde(rename = "fairplay")]
    FairPlay,
    #[serde(rename = "sample-aes")]
    SampleAes,
    #[serde(rename = "aes-128")]
    Aes128,
    #[serde(rename = "widevine")]
    Widevine,
    #[serde(rename = "clear")]
    Clear,
    #[serde(rename = "playready")]
    PlayReady,
}

impl Drm {
    pub const ALL: [Drm; 6] = [
        Drm::FairPlay,
        Drm::SampleAes,
        Drm::Aes128,
        Drm::Widevine,
        Drm::Clear,
        Drm::PlayReady,
    ];

    pub fn is_clear(&self) -> bool {
        matches!(self, Drm::Clear)
    }

    /// Schemes the browser decrypts itself, bypassing the HLS engine
    pub fn requires_native_hls(&self) -> bool {
        matches!(self, Drm::FairPlay | Drm::SampleAes)
    }

    /// Key system name used in engine protection data
    pub fn key_system(&self) -> Option<&'static str> {
        match self {
            Drm::Widevine => Some("com.widevine.alpha"),
            Drm::PlayReady => Some("com.microsoft.playready"),
            Drm::FairPlay => Some("com.apple.fps.1_0"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Drm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Drm::FairPlay => "fairplay",
            Drm::SampleAes => "sample-aes",
            Drm::Aes128 => "aes-128",
            Drm::Widevine => "widevine",
            Drm::Clear => "clear",
            Drm::PlayReady => "playready",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Drm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Drm::ALL
            .into_iter()
            .find(|drm| drm.to_string() == s.trim().to_lowercase())
            .ok_or_else(|| crate::Error::InvalidParameters(format!("unknown DRM '{s}'")))
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A quality level as reported by the attached engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Engine-side level index
    pub index: usize,
    /// Bandwidth in bits per second
    pub bitrate: u64,
    pub resolution: Option<Resolution>,
    /// Audio-only level (no video codec)
    pub audio_only: bool,
}

/// Quality menu entry exposed to the rendering layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityOption {
    /// Level index, or -1 for automatic selection
    pub index: i32,
    pub label: String,
    pub active_label: String,
    pub bitrate: Option<u64>,
    pub active: bool,
}

impl QualityOption {
    pub fn from_level(level: &QualityLevel, active: bool) -> Self {
        let mbps = level.bitrate as f64 / 1_000_000.0;
        let (label, active_label) = match (level.resolution, level.audio_only) {
            (Some(resolution), false) => (format!("{resolution} ({mbps:.1}Mbps)"), resolution.to_string()),
            _ => {
                let kbps = format!("{}kbps", level.bitrate / 1000);
                (kbps.clone(), kbps)
            }
        };

        Self {
            index: level.index as i32,
            label,
            active_label,
            bitrate: Some(level.bitrate),
            active,
        }
    }
}

/// Quality level selection; `Auto` hands control back to the engine's ABR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelSelection {
    Auto,
    Level(usize),
}

impl From<i32> for LevelSelection {
    fn from(index: i32) -> Self {
        if index < 0 {
            LevelSelection::Auto
        } else {
            LevelSelection::Level(index as usize)
        }
    }
}

/// Audio or text track as reported by the engine or media sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub index: i32,
    pub label: String,
    pub language: Option<String>,
    pub active: bool,
}

impl TrackInfo {
    pub fn new(index: i32, label: impl Into<String>, language: Option<String>, active: bool) -> Self {
        Self {
            index,
            label: label.into(),
            language,
            active,
        }
    }
}

/// A selectable menu with its currently active entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu<T> {
    pub options: Vec<T>,
    pub active: Option<T>,
}

impl<T> Default for Menu<T> {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            active: None,
        }
    }
}

/// Playback rate menu offered to the rendering layer
pub const PLAYBACK_RATES: [f64; 8] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0];

/// Lifecycle phases of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Session object exists, nothing started
    Created,
    /// Resolving the active collection item
    ResolvingContent,
    /// Fetching offers and selecting protocol/DRM
    Negotiating,
    /// Binding an engine to the media sink
    Attaching,
    /// First frame is playable
    Playing,
    /// An engine error is being classified or recovered in place
    Stalled,
    /// Waiting for, or running, a full reload
    Reloading,
    /// Terminal error for this initialization attempt
    Failed,
    /// Torn down, terminal
    Destroyed,
}

impl SessionPhase {
    /// Check if transition to target phase is valid
    pub fn can_transition_to(&self, target: SessionPhase) -> bool {
        use SessionPhase::*;
        if *self == Destroyed {
            return false;
        }
        matches!(
            (self, target),
            // Any live phase may be torn down
            (_, Destroyed) |
            // Initialization passes (fresh, reload, or collection advance)
            (Created, ResolvingContent) | (Created, Failed) | (Playing, ResolvingContent) | (Stalled, ResolvingContent) |
            (Reloading, ResolvingContent) | (Failed, ResolvingContent) | (Attaching, ResolvingContent) |
            (ResolvingContent, Negotiating) | (ResolvingContent, Failed) | (ResolvingContent, Reloading) |
            (Negotiating, Attaching) | (Negotiating, Failed) | (Negotiating, Reloading) |
            (Attaching, Playing) | (Attaching, Stalled) | (Attaching, Failed) | (Attaching, Reloading) |
            // Error handling
            (Playing, Stalled) | (Playing, Reloading) | (Playing, Failed) |
            (Stalled, Playing) | (Stalled, Reloading) | (Stalled, Failed) |
            (Reloading, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Destroyed)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Created => write!(f, "created"),
            SessionPhase::ResolvingContent => write!(f, "resolving_content"),
            SessionPhase::Negotiating => write!(f, "negotiating"),
            SessionPhase::Attaching => write!(f, "attaching"),
            SessionPhase::Playing => write!(f, "playing"),
            SessionPhase::Stalled => write!(f, "stalled"),
            SessionPhase::Reloading => write!(f, "reloading"),
            SessionPhase::Failed => write!(f, "failed"),
            SessionPhase::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Media sink state captured before a teardown and restored after re-attachment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResumeSnapshot {
    pub muted: bool,
    pub volume: f64,
    /// Absent when switching collection items
    pub current_time: Option<f64>,
    pub playing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drm_serde_names() {
        let json = serde_json::to_string(&[Drm::SampleAes, Drm::Aes128, Drm::Clear]).unwrap();
        assert_eq!(json, r#"["sample-aes","aes-128","clear"]"#);
        assert_eq!("widevine".parse::<Drm>().unwrap(), Drm::Widevine);
        assert!("nagra".parse::<Drm>().is_err());
    }

    #[test]
    fn test_level_selection_from_index() {
        assert_eq!(LevelSelection::from(-1), LevelSelection::Auto);
        assert_eq!(LevelSelection::from(3), LevelSelection::Level(3));
    }

    #[test]
    fn test_quality_option_labels() {
        let level = QualityLevel {
            index: 2,
            bitrate: 4_500_000,
            resolution: Some(Resolution::new(1920, 1080)),
            audio_only: false,
        };
        let option = QualityOption::from_level(&level, true);
        assert_eq!(option.label, "1920x1080 (4.5Mbps)");
        assert_eq!(option.active_label, "1920x1080");

        let audio = QualityLevel { index: 0, bitrate: 128_000, resolution: None, audio_only: true };
        assert_eq!(QualityOption::from_level(&audio, false).label, "128kbps");
    }

    #[test]
    fn test_destroyed_is_terminal() {
        assert!(!SessionPhase::Destroyed.can_transition_to(SessionPhase::ResolvingContent));
        assert!(!SessionPhase::Destroyed.can_transition_to(SessionPhase::Destroyed));
        assert!(SessionPhase::Negotiating.can_transition_to(SessionPhase::Destroyed));
    }

    #[test]
    fn test_negotiating_cannot_skip_to_playing() {
        assert!(SessionPhase::Negotiating.can_transition_to(SessionPhase::Attaching));
        assert!(!SessionPhase::Negotiating.can_transition_to(SessionPhase::Playing));
    }
}
