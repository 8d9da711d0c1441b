//! Playback parameters supplied by the embedding application
//!
//! The structure mirrors the three option groups hosts already pass to web
//! players (`clientOptions`, `sourceOptions`, `playerOptions`). Parameters are
//! supplied once per session and re-used verbatim on every reinitialization.

use crate::engine::PlayerProfile;
use crate::reload::RecoveryPolicy;
use crate::types::{Drm, Protocol};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default content fabric configuration endpoint
pub const DEFAULT_NETWORK: &str = "https://main.net955305.contentfabric.io/config";

/// Complete, immutable parameter set for one playback session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackParameters {
    pub client_options: ClientOptions,
    pub source_options: SourceOptions,
    pub player_options: PlayerOptions,
}

impl PlaybackParameters {
    /// Parse parameters from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        Ok(params.normalized())
    }

    /// Parse parameters from a TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let params: Self = toml::from_str(toml)?;
        Ok(params.normalized())
    }

    /// Load parameters from a `.json` or `.toml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            other => Err(Error::InvalidParameters(format!(
                "unsupported parameters file extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Custom HLS engine options force the custom profile
    pub fn normalized(mut self) -> Self {
        if self
            .player_options
            .hlsjs_options
            .as_ref()
            .is_some_and(|options| !options.is_empty())
        {
            self.player_options.player_profile = PlayerProfile::Custom;
        }
        self
    }

    /// Reject parameter sets that can never start playback
    pub fn validate(&self) -> Result<()> {
        let source = &self.source_options;

        if source.protocols.is_empty() {
            return Err(Error::InvalidParameters("at least one protocol must be allowed".into()));
        }

        if let Some(collection) = &source.media_collection_options {
            if collection.collection_id.is_some()
                && collection.media_catalog_object_id.is_none()
                && collection.media_catalog_version_hash.is_none()
            {
                return Err(Error::InvalidParameters(
                    "Invalid collection options: Media catalog not specified".into(),
                ));
            }
        }

        let playout = &source.playout_parameters;
        if !self.plays_collection()
            && playout.object_id.is_none()
            && playout.version_hash.is_none()
            && playout.link_path.is_none()
        {
            return Err(Error::InvalidParameters(
                "objectId, versionHash or linkPath must be specified".into(),
            ));
        }

        if let Some(0) = self.player_options.max_bitrate {
            return Err(Error::InvalidParameters("maxBitrate must be positive".into()));
        }

        Ok(())
    }

    /// True when the source names a collection to play from
    pub fn plays_collection(&self) -> bool {
        self.source_options
            .media_collection_options
            .as_ref()
            .is_some_and(|c| c.collection_id.is_some())
    }
}

/// Content fabric client access options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Configuration URL of the fabric network
    pub network: String,
    pub static_token: Option<String>,
    pub tenant_id: Option<String>,
    pub ntp_id: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            static_token: None,
            tenant_id: None,
            ntp_id: None,
        }
    }
}

/// What to play and how it may be delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceOptions {
    /// Allowed protocols in priority order
    pub protocols: Vec<Protocol>,
    /// Allowed DRMs in priority order; empty prefers any protected scheme
    pub drms: Vec<Drm>,
    pub content_info: ContentInfo,
    pub playout_parameters: PlayoutParameters,
    pub media_collection_options: Option<MediaCollectionOptions>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            protocols: vec![Protocol::Hls, Protocol::Dash],
            drms: vec![
                Drm::FairPlay,
                Drm::SampleAes,
                Drm::Aes128,
                Drm::Widevine,
                Drm::Clear,
                Drm::PlayReady,
            ],
            content_info: ContentInfo::default(),
            playout_parameters: PlayoutParameters::default(),
            media_collection_options: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Live,
    #[default]
    Vod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub live_dvr: bool,
}

/// Object, version and offering identifiers plus clip hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayoutParameters {
    pub object_id: Option<String>,
    pub version_hash: Option<String>,
    pub write_token: Option<String>,
    pub link_path: Option<String>,
    pub offering: Option<String>,
    pub handler: String,
    pub authorization_token: Option<String>,
    pub clip_start: Option<f64>,
    pub clip_end: Option<f64>,
    pub ignore_trimming: bool,
    pub resolve: bool,
    pub direct_link: bool,
}

impl Default for PlayoutParameters {
    fn default() -> Self {
        Self {
            object_id: None,
            version_hash: None,
            write_token: None,
            link_path: None,
            offering: None,
            handler: "playout".to_string(),
            authorization_token: None,
            clip_start: None,
            clip_end: None,
            ignore_trimming: false,
            resolve: false,
            direct_link: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaCollectionOptions {
    pub media_catalog_object_id: Option<String>,
    pub media_catalog_version_hash: Option<String>,
    pub collection_id: Option<String>,
}

/// Control bar visibility; rendered by the host UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlsMode {
    Off,
    OffWithVolumeToggle,
    #[default]
    Autohide,
    On,
    Default,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoplayMode {
    #[default]
    Off,
    On,
    /// Play while the video is in the viewport (host-driven)
    WhenVisible,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutedMode {
    #[default]
    Off,
    On,
    /// Mute while out of the viewport (host-driven)
    WhenNotVisible,
    /// Start unmuted, fall back to muted if autoplay is blocked
    OffIfPossible,
}

/// Player behaviour policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerOptions {
    pub app_name: Option<String>,
    pub controls: ControlsMode,
    pub autoplay: AutoplayMode,
    pub muted: MutedMode,
    pub player_profile: PlayerProfile,
    /// Raw HLS engine overrides; presence forces the custom profile
    pub hlsjs_options: Option<serde_json::Map<String, serde_json::Value>>,
    /// Raw DASH engine settings merged over the defaults
    pub dashjs_options: Option<serde_json::Value>,
    /// Cap in bits per second
    pub max_bitrate: Option<u64>,
    pub cap_level_to_player_size: bool,
    pub allow_casting: bool,
    pub verify_content: bool,
    pub prefer_native_hls: bool,
    pub start_time: Option<f64>,
    pub debug_logging: bool,
    pub recovery: RecoveryPolicy,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            app_name: None,
            controls: ControlsMode::default(),
            autoplay: AutoplayMode::default(),
            muted: MutedMode::default(),
            player_profile: PlayerProfile::default(),
            hlsjs_options: None,
            dashjs_options: None,
            max_bitrate: None,
            cap_level_to_player_size: false,
            allow_casting: true,
            verify_content: false,
            prefer_native_hls: false,
            start_time: None,
            debug_logging: false,
            recovery: RecoveryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_legacy_player() {
        let params = PlaybackParameters::default();
        assert_eq!(params.source_options.protocols, vec![Protocol::Hls, Protocol::Dash]);
        assert_eq!(params.source_options.drms.len(), 6);
        assert_eq!(params.player_options.autoplay, AutoplayMode::Off);
        assert!(params.player_options.allow_casting);
        assert_eq!(params.client_options.network, DEFAULT_NETWORK);
    }

    #[test]
    fn test_json_parsing_with_enumerated_values() {
        let json = r#"{
            "sourceOptions": {
                "protocols": ["dash"],
                "drms": ["widevine", "clear"],
                "playoutParameters": { "objectId": "iq__abc" }
            },
            "playerOptions": {
                "autoplay": "when-visible",
                "muted": "off-if-possible",
                "controls": "autohide",
                "maxBitrate": 3000000
            }
        }"#;

        let params = PlaybackParameters::from_json_str(json).unwrap();
        assert_eq!(params.source_options.protocols, vec![Protocol::Dash]);
        assert_eq!(params.player_options.autoplay, AutoplayMode::WhenVisible);
        assert_eq!(params.player_options.muted, MutedMode::OffIfPossible);
        assert_eq!(params.player_options.max_bitrate, Some(3_000_000));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_custom_hls_options_force_custom_profile() {
        let json = r#"{
            "sourceOptions": { "playoutParameters": { "objectId": "iq__abc" } },
            "playerOptions": { "hlsjsOptions": { "maxBufferLength": 60 } }
        }"#;

        let params = PlaybackParameters::from_json_str(json).unwrap();
        assert_eq!(params.player_options.player_profile, PlayerProfile::Custom);
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
            [sourceOptions]
            protocols = ["hls"]

            [sourceOptions.playoutParameters]
            versionHash = "hq__xyz"

            [playerOptions]
            playerProfile = "low_latency"
        "#;

        let params = PlaybackParameters::from_toml_str(toml).unwrap();
        assert_eq!(params.player_options.player_profile, PlayerProfile::LowLatency);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut params = PlaybackParameters::default();
        assert!(params.validate().is_err(), "no identifiers");

        params.source_options.playout_parameters.object_id = Some("iq__abc".into());
        params.source_options.protocols.clear();
        assert!(params.validate().is_err(), "empty protocol list");

        let mut params = PlaybackParameters::default();
        params.source_options.media_collection_options = Some(MediaCollectionOptions {
            collection_id: Some("col-1".into()),
            ..Default::default()
        });
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("Media catalog not specified"));
    }
}
