//! Fabric Player Core - Playback controller for adaptive streaming
//!
//! This crate decides how a piece of content is played and keeps it playing:
//! - Protocol / DRM negotiation against the server's offer matrix
//! - HLS and DASH engine lifecycle behind a uniform adapter
//! - Error classification and in-place media recovery
//! - Bounded, delayed reloads with position restore
//! - Settings propagation to the rendering layer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Fabric Player Core                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Content    │  │ Negotiation  │  │    Engine    │           │
//! │  │   Resolver   │  │   Policy     │  │   Adapters   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │    Error     │  │  Settings   │  │    Reload    │            │
//! │  │  Classifier  │  │     Bus     │  │  Controller  │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod params;
pub mod negotiation;
pub mod engine;
pub mod classify;
pub mod reload;
pub mod bus;
pub mod casting;
pub mod resolver;
pub mod sink;
pub mod session;

pub use error::{Error, Result};
pub use types::*;
pub use params::{AutoplayMode, ControlsMode, MutedMode, PlaybackParameters, PlayerOptions, SourceOptions};
pub use negotiation::{negotiate, DeviceCapabilities, NegotiationResult, OfferMatrix, PlayoutMethod};
pub use engine::{EngineAdapter, EngineEvent, EngineFactory, EngineKind, PlayerProfile};
pub use classify::{ErrorClassifier, ErrorKind, ErrorRecord, RawError};
pub use reload::{RecoveryPolicy, ReloadController, ReloadState, RestartHook, RestartVerdict};
pub use bus::{SettingsBus, SettingsChange, Subscription};
pub use resolver::ContentResolver;
pub use sink::{MediaSink, PlayError};
pub use session::{Collaborators, PlaybackSession, SessionCallbacks};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Fabric Player Core initialized");
}
