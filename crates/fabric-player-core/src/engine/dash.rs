//! DASH adapter

use super::{
    merge_json, split_authorization, text_menu, track_menu, AttachOptions, Engine, EngineAdapter, EngineConfig,
    EngineFactory, EngineKind, EventSender, RequestModifier,
};
use crate::negotiation::NegotiationResult;
use crate::sink::MediaSink;
use crate::types::{Drm, LevelSelection, Menu, QualityOption, TrackInfo};
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

/// Settings tree for the DASH engine.
///
/// Fast switching and buffer flushes on track switch are on and text is off
/// unless the custom options say otherwise.
pub fn dash_settings(custom: Option<&Value>, cap_level_to_player_size: bool, max_bitrate: Option<u64>) -> Value {
    let mut settings = json!({
        "streaming": {
            "buffer": {
                "fastSwitchEnabled": true,
                "flushBufferAtTrackSwitch": true
            },
            "text": {
                "defaultEnabled": false
            }
        }
    });

    if let Some(custom) = custom {
        merge_json(&mut settings, custom);
    }

    if cap_level_to_player_size {
        merge_json(&mut settings, &json!({ "streaming": { "abr": { "limitBitrateByPortal": true } } }));
    }

    if let Some(max_bitrate) = max_bitrate {
        // The engine takes kbps
        let kbps = max_bitrate as f64 / 1000.0;
        merge_json(&mut settings, &json!({ "streaming": { "abr": { "maxBitrate": { "video": kbps } } } }));
    }

    settings
}

fn protection_data(negotiation: &NegotiationResult) -> Option<Value> {
    if !matches!(negotiation.drm, Drm::Widevine | Drm::PlayReady) {
        return None;
    }
    let key_system = negotiation.drm.key_system()?;
    let server = negotiation.license_server()?;

    let mut protection = Map::new();
    protection.insert(key_system.to_string(), json!({ "serverURL": server }));
    Some(Value::Object(protection))
}

pub struct DashAdapter {
    engine: Option<Box<dyn Engine>>,
}

impl DashAdapter {
    #[instrument(skip_all, fields(drm = %negotiation.drm))]
    pub async fn attach(
        factory: &dyn EngineFactory,
        negotiation: &NegotiationResult,
        sink: Arc<dyn MediaSink>,
        options: &AttachOptions,
        events: EventSender,
    ) -> Result<Self> {
        let (playout_url, token) =
            split_authorization(&negotiation.playout_url, options.authorization_token.as_deref());

        let config = EngineConfig {
            kind: EngineKind::Dash,
            settings: dash_settings(
                options.dash_options.as_ref(),
                options.cap_level_to_player_size,
                options.max_bitrate,
            ),
            request_modifier: RequestModifier::bearer(token.as_deref())?,
            protection: protection_data(negotiation),
            autoplay: options.autoplay,
        };

        let engine = factory.create(config, events).await?;
        if let Err(e) = engine.attach_sink(sink).and_then(|_| engine.load_source(&playout_url)) {
            engine.destroy();
            return Err(e);
        }

        info!("DASH engine attached");
        Ok(Self { engine: Some(engine) })
    }
}

impl EngineAdapter for DashAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Dash
    }

    fn quality_levels(&self) -> Menu<QualityOption> {
        let Some(engine) = &self.engine else {
            return Menu::default();
        };

        let current = engine.current_level();
        let mut levels = engine.levels();
        levels.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));

        let options: Vec<QualityOption> = levels
            .iter()
            .map(|level| QualityOption::from_level(level, current == Some(level.index)))
            .collect();
        let active = options.iter().find(|option| option.active).cloned();
        Menu { options, active }
    }

    fn set_quality(&self, selection: LevelSelection) {
        let Some(engine) = &self.engine else {
            return;
        };

        engine.set_level(selection);
        engine.update_settings(&json!({
            "streaming": {
                "trackSwitchMode": "alwaysReplace",
                "buffer": {
                    "fastSwitchEnabled": true,
                    "flushBufferAtTrackSwitch": true
                },
                "abr": {
                    "autoSwitchBitrate": { "video": selection == LevelSelection::Auto }
                }
            }
        }));
    }

    fn audio_tracks(&self) -> Menu<TrackInfo> {
        self.engine
            .as_ref()
            .map(|engine| track_menu(engine.audio_tracks()))
            .unwrap_or_default()
    }

    fn set_audio_track(&self, index: i32) {
        if let (Some(engine), Ok(index)) = (&self.engine, usize::try_from(index)) {
            engine.set_audio_track(index);
        }
    }

    fn text_tracks(&self) -> Menu<TrackInfo> {
        self.engine
            .as_ref()
            .map(|engine| text_menu(engine.text_tracks()))
            .unwrap_or_default()
    }

    fn set_text_track(&self, index: i32) {
        if let Some(engine) = &self.engine {
            engine.set_text_track(usize::try_from(index).ok());
        }
    }

    fn recover_media_error(&self) -> bool {
        match &self.engine {
            Some(engine) => {
                engine.recover_media_error();
                true
            }
            None => false,
        }
    }

    fn detach(&mut self) {
        if let Some(engine) = self.engine.take() {
            info!("Destroying DASH engine");
            engine.destroy();
        }
    }

    fn is_attached(&self) -> bool {
        self.engine.is_some()
    }
}
