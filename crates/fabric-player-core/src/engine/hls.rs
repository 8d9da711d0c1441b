//! HLS adapter
//!
//! Drives the HLS engine, or hands the playout URL straight to the sink when
//! the stream needs browser-native decryption (FairPlay, SAMPLE-AES) or the
//! engine cannot run.

use super::{
    hls_settings, split_authorization, text_menu, track_menu, Engine, EngineAdapter, EngineConfig, EngineEvent,
    EngineFactory, EngineKind, EventSender, AttachOptions, RequestModifier,
};
use crate::negotiation::NegotiationResult;
use crate::sink::MediaSink;
use crate::types::{LevelSelection, Menu, QualityLevel, QualityOption, TrackInfo};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

enum Backend {
    Engine(Box<dyn Engine>),
    /// The sink plays the URL itself
    Native,
    Detached,
}

pub struct HlsAdapter {
    backend: Backend,
    sink: Arc<dyn MediaSink>,
    max_bitrate: Option<u64>,
}

/// Levels to drop for a bitrate cap, and where to start instead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelCap {
    /// Positions to remove, highest first so earlier positions stay valid
    pub remove: Vec<usize>,
    /// Replacement start level when the intended one is removed
    pub start_level: Option<usize>,
}

/// Compute the levels above `max_bitrate`. At least the first level always survives.
pub fn levels_to_remove(levels: &[QualityLevel], max_bitrate: u64, first_level: usize) -> LevelCap {
    let mut remove: Vec<usize> = levels
        .iter()
        .enumerate()
        .filter(|(_, level)| level.bitrate > max_bitrate)
        .map(|(position, _)| position)
        .rev()
        .collect();

    if !levels.is_empty() && remove.len() == levels.len() {
        warn!(max_bitrate, "Max bitrate is below every available level, keeping the first");
        remove.retain(|&position| position > 0);
    }

    let start_level = remove
        .contains(&first_level)
        .then(|| (0..levels.len()).rev().find(|position| !remove.contains(position)))
        .flatten();

    LevelCap { remove, start_level }
}

impl HlsAdapter {
    #[instrument(skip_all, fields(drm = %negotiation.drm))]
    pub async fn attach(
        factory: &dyn EngineFactory,
        negotiation: &NegotiationResult,
        sink: Arc<dyn MediaSink>,
        options: &AttachOptions,
        events: EventSender,
    ) -> Result<Self> {
        let native =
            negotiation.drm.requires_native_hls() || options.prefer_native_hls || !factory.hls_engine_supported();

        if native {
            info!("Playing HLS natively");
            // The sink cannot add headers, so the URL keeps its query token
            sink.set_source(Some(&negotiation.playout_url));
            return Ok(Self {
                backend: Backend::Native,
                sink,
                max_bitrate: options.max_bitrate,
            });
        }

        let (playout_url, token) =
            split_authorization(&negotiation.playout_url, options.authorization_token.as_deref());

        let settings = hls_settings(
            options.profile,
            options.custom_hls_options.as_ref(),
            options.cap_level_to_player_size,
        );

        let config = EngineConfig {
            kind: EngineKind::Hls,
            settings: Value::Object(settings),
            request_modifier: RequestModifier::bearer(token.as_deref())?,
            protection: None,
            autoplay: options.autoplay,
        };

        let engine = factory.create(config, events).await?;
        if let Err(e) = engine
            .load_source(&playout_url)
            .and_then(|_| engine.attach_sink(Arc::clone(&sink)))
        {
            engine.destroy();
            return Err(e);
        }

        info!(profile = %options.profile, "HLS engine attached");
        Ok(Self {
            backend: Backend::Engine(engine),
            sink,
            max_bitrate: options.max_bitrate,
        })
    }

    fn engine(&self) -> Option<&dyn Engine> {
        match &self.backend {
            Backend::Engine(engine) => Some(engine.as_ref()),
            _ => None,
        }
    }

    fn apply_level_cap(&self, levels: &[QualityLevel], first_level: usize) {
        let (Some(engine), Some(max_bitrate)) = (self.engine(), self.max_bitrate) else {
            return;
        };

        let cap = levels_to_remove(levels, max_bitrate, first_level);
        if cap.remove.is_empty() {
            return;
        }

        debug!(removed = ?cap.remove, max_bitrate, "Removing levels above max bitrate");
        if let Some(start) = cap.start_level {
            engine.set_start_level(start);
        }
        for position in cap.remove {
            engine.remove_level(position);
        }
    }
}

impl EngineAdapter for HlsAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Hls
    }

    fn is_native(&self) -> bool {
        matches!(self.backend, Backend::Native)
    }

    fn on_event(&mut self, event: &EngineEvent) {
        if let EngineEvent::ManifestParsed { levels, first_level } = event {
            self.apply_level_cap(levels, *first_level);
        }
    }

    fn quality_levels(&self) -> Menu<QualityOption> {
        let Some(engine) = self.engine() else {
            return Menu::default();
        };

        let current = engine.current_level();
        let auto = engine.auto_level_enabled();

        let mut levels = engine.levels();
        levels.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));
        let mut options: Vec<QualityOption> = levels
            .iter()
            .map(|level| QualityOption::from_level(level, !auto && current == Some(level.index)))
            .collect();

        if !options.is_empty() {
            let playing = options
                .iter()
                .find(|option| current == Some(option.index as usize))
                .map(|option| format!("Auto ({})", option.active_label));

            options.insert(
                0,
                QualityOption {
                    index: -1,
                    label: "Auto".into(),
                    active_label: playing.unwrap_or_else(|| "Auto".into()),
                    bitrate: None,
                    active: auto,
                },
            );
        }

        let active = options.iter().find(|option| option.active).cloned();
        Menu { options, active }
    }

    fn set_quality(&self, selection: LevelSelection) {
        if let Some(engine) = self.engine() {
            engine.set_level(selection);
        }
    }

    fn audio_tracks(&self) -> Menu<TrackInfo> {
        match &self.backend {
            Backend::Engine(engine) => track_menu(engine.audio_tracks()),
            Backend::Native => track_menu(self.sink.audio_tracks()),
            Backend::Detached => Menu::default(),
        }
    }

    fn set_audio_track(&self, index: i32) {
        let Ok(index) = usize::try_from(index) else {
            return;
        };
        match &self.backend {
            Backend::Engine(engine) => engine.set_audio_track(index),
            Backend::Native => self.sink.set_audio_track(index),
            Backend::Detached => {}
        }
    }

    // Subtitles render through the sink in both modes
    fn text_tracks(&self) -> Menu<TrackInfo> {
        if matches!(self.backend, Backend::Detached) {
            return Menu::default();
        }
        text_menu(self.sink.text_tracks())
    }

    fn set_text_track(&self, index: i32) {
        if !matches!(self.backend, Backend::Detached) {
            self.sink.set_text_track(usize::try_from(index).ok());
        }
    }

    fn recover_media_error(&self) -> bool {
        match self.engine() {
            Some(engine) => {
                engine.recover_media_error();
                true
            }
            None => false,
        }
    }

    fn detach(&mut self) {
        match std::mem::replace(&mut self.backend, Backend::Detached) {
            Backend::Engine(engine) => {
                info!("Destroying HLS engine");
                engine.destroy();
            }
            Backend::Native => self.sink.set_source(None),
            Backend::Detached => {}
        }
    }

    fn is_attached(&self) -> bool {
        !matches!(self.backend, Backend::Detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(bitrates: &[u64]) -> Vec<QualityLevel> {
        bitrates
            .iter()
            .enumerate()
            .map(|(index, &bitrate)| QualityLevel {
                index,
                bitrate,
                resolution: None,
                audio_only: false,
            })
            .collect()
    }

    #[test]
    fn test_cap_removes_highest_first() {
        let cap = levels_to_remove(&ladder(&[800_000, 2_000_000, 5_000_000, 8_000_000]), 3_000_000, 0);
        assert_eq!(cap.remove, vec![3, 2]);
        assert_eq!(cap.start_level, None);
    }

    #[test]
    fn test_cap_keeps_first_level() {
        let cap = levels_to_remove(&ladder(&[4_000_000, 6_000_000]), 1_000_000, 1);
        assert_eq!(cap.remove, vec![1]);
        assert_eq!(cap.start_level, Some(0));
    }

    #[test]
    fn test_removed_start_level_repoints_to_highest_survivor() {
        let cap = levels_to_remove(&ladder(&[800_000, 2_000_000, 5_000_000]), 2_500_000, 2);
        assert_eq!(cap.start_level, Some(1));
    }

    #[test]
    fn test_removed_start_level_zero_is_repointed() {
        let cap = levels_to_remove(&ladder(&[9_000_000, 1_000_000]), 2_000_000, 0);
        assert_eq!(cap.remove, vec![0]);
        assert_eq!(cap.start_level, Some(1));
    }
}
