//! Player profiles: named bundles of HLS engine tuning

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerProfile {
    #[default]
    Default,
    LowLatency,
    UltraLowLatency,
    /// Caller-supplied engine options only
    Custom,
}

impl PlayerProfile {
    pub const ALL: [PlayerProfile; 4] = [
        PlayerProfile::Default,
        PlayerProfile::LowLatency,
        PlayerProfile::UltraLowLatency,
        PlayerProfile::Custom,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PlayerProfile::Default => "Default",
            PlayerProfile::LowLatency => "Low Latency Live",
            PlayerProfile::UltraLowLatency => "Ultra Low Latency Live",
            PlayerProfile::Custom => "Custom",
        }
    }

    /// Engine settings the profile applies
    pub fn hls_settings(&self) -> Map<String, Value> {
        let settings = match self {
            PlayerProfile::Default => json!({
                "lowLatencyMode": false,
                "maxBufferLength": 30,
                "backBufferLength": 90,
                "liveSyncDurationCount": 3,
            }),
            PlayerProfile::LowLatency => json!({
                "lowLatencyMode": true,
                "maxBufferLength": 10,
                "backBufferLength": 30,
                "liveSyncDuration": 5,
                "liveMaxLatencyDuration": 10,
                "maxLiveSyncPlaybackRate": 1.05,
            }),
            PlayerProfile::UltraLowLatency => json!({
                "lowLatencyMode": true,
                "maxBufferLength": 4,
                "backBufferLength": 10,
                "liveSyncDuration": 2,
                "liveMaxLatencyDuration": 4,
                "maxLiveSyncPlaybackRate": 1.1,
            }),
            PlayerProfile::Custom => json!({}),
        };

        match settings {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl std::fmt::Display for PlayerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerProfile::Default => write!(f, "default"),
            PlayerProfile::LowLatency => write!(f, "low_latency"),
            PlayerProfile::UltraLowLatency => write!(f, "ultra_low_latency"),
            PlayerProfile::Custom => write!(f, "custom"),
        }
    }
}

/// Final HLS engine options: player-size capping, then the profile, then custom overrides
pub fn hls_settings(
    profile: PlayerProfile,
    custom: Option<&Map<String, Value>>,
    cap_level_to_player_size: bool,
) -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("capLevelToPlayerSize".into(), Value::Bool(cap_level_to_player_size));
    settings.extend(profile.hls_settings());

    if profile == PlayerProfile::Custom {
        if let Some(custom) = custom {
            settings.extend(custom.clone());
        }
    }

    settings
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
