//! CLI command implementations

use crate::output::{self, OutputFormat};
use anyhow::Context;
use fabric_player_core::classify::RawError;
use fabric_player_core::engine::{dash_settings, hls_settings, RequestModifier};
use fabric_player_core::resolver::fetch_offer_matrix;
use fabric_player_core::{
    DeviceCapabilities, Drm, ErrorClassifier, NegotiationResult, OfferMatrix, PlaybackParameters, PlayerProfile,
    Protocol,
};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use tracing::{debug, info};
use url::Url;

/// Select a protocol / DRM pair the way a session would
pub async fn negotiate(params_path: &Path, offers: &str, device_drms: &[String], format: &str) -> anyhow::Result<()> {
    let params = PlaybackParameters::load(params_path)
        .with_context(|| format!("loading {}", params_path.display()))?;
    params.validate()?;
    debug!(path = %params_path.display(), "Loaded playback parameters");

    let device = DeviceCapabilities::new(
        device_drms
            .iter()
            .map(|name| name.parse::<Drm>())
            .collect::<Result<Vec<_>, _>>()?,
    );

    let matrix = load_offers(offers, params.source_options.playout_parameters.authorization_token.as_deref()).await?;
    let source = &params.source_options;
    let result = NegotiationResult::resolve(&matrix, &source.protocols, &source.drms, &device)?;
    info!(protocol = %result.protocol, drm = %result.drm, "Negotiated playout");

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&result)?),
        OutputFormat::Table => {
            #[derive(Tabled)]
            struct Row {
                protocol: Protocol,
                drm: Drm,
                playout_url: String,
                license_server: String,
            }

            println!(
                "{}",
                output::table([Row {
                    protocol: result.protocol,
                    drm: result.drm,
                    playout_url: result.playout_url.to_string(),
                    license_server: result.license_server().unwrap_or("-").to_string(),
                }])
            );
        }
        OutputFormat::Text => {
            println!("Negotiated playout:");
            println!("  Protocol: {}", result.protocol);
            println!("  DRM: {}", result.drm);
            println!("  URL: {}", result.playout_url);
            if let Some(server) = result.license_server() {
                println!("  License server: {}", server);
            }
            if let Some(session_id) = &result.session_id {
                println!("  Session: {}", session_id);
            }
        }
    }

    Ok(())
}

async fn load_offers(source: &str, authorization_token: Option<&str>) -> anyhow::Result<OfferMatrix> {
    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            info!(%url, "Fetching offer matrix");
            let client = reqwest::Client::new();
            let modifier = RequestModifier::bearer(authorization_token)?;
            Ok(fetch_offer_matrix(&client, &url, Some(&modifier)).await?)
        }
        _ => {
            debug!(path = source, "Reading offer matrix");
            let contents = std::fs::read_to_string(source).with_context(|| format!("reading {}", source))?;
            Ok(serde_json::from_str(&contents)?)
        }
    }
}

#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    error: Option<String>,
    protocols: Vec<Protocol>,
    drms: Vec<Drm>,
    profile: PlayerProfile,
    collection: bool,
    max_reloads: u32,
}

/// Validate a parameters file
pub fn validate(params_path: &Path, format: &str) -> anyhow::Result<()> {
    let params = PlaybackParameters::load(params_path)
        .with_context(|| format!("loading {}", params_path.display()))?;
    let validation = params.validate();

    let report = ValidationReport {
        valid: validation.is_ok(),
        error: validation.as_ref().err().map(ToString::to_string),
        protocols: params.source_options.protocols.clone(),
        drms: params.source_options.drms.clone(),
        profile: params.player_options.player_profile,
        collection: params.plays_collection(),
        max_reloads: params.player_options.recovery.max_reloads,
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&report)?),
        OutputFormat::Text | OutputFormat::Table => {
            println!("Parameters: {}", params_path.display());
            println!("  Protocols: {}", join(&report.protocols));
            println!("  DRMs: {}", if report.drms.is_empty() { "any".to_string() } else { join(&report.drms) });
            println!("  Profile: {}", report.profile);
            println!("  Collection: {}", report.collection);
            println!("  Max reloads: {}", report.max_reloads);
            match &report.error {
                None => println!("\nValidation: PASSED"),
                Some(error) => println!("\nValidation: FAILED ({})", error),
            }
        }
    }

    if let Err(e) = validation {
        anyhow::bail!(e);
    }
    Ok(())
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Serialize, Tabled)]
struct ClassifiedRow {
    #[tabled(rename = "#")]
    position: usize,
    details: String,
    kind: String,
    fatal: bool,
    escalated: bool,
}

/// Classify errors in order, as a session would see them
pub fn classify(errors_path: &Path, threshold: Option<u32>, format: &str) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(errors_path)
        .with_context(|| format!("reading {}", errors_path.display()))?;

    let errors: Vec<RawError> = match serde_json::from_str::<serde_json::Value>(&contents)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?,
        single => vec![serde_json::from_value(single)?],
    };

    debug!(count = errors.len(), "Loaded raw errors");
    let mut classifier = threshold.map(ErrorClassifier::new).unwrap_or_default();
    let rows: Vec<ClassifiedRow> = errors
        .into_iter()
        .enumerate()
        .map(|(position, raw)| {
            let record = classifier.classify(raw);
            ClassifiedRow {
                position: position + 1,
                details: record.raw.details.clone(),
                kind: record.kind.to_string(),
                fatal: record.fatal,
                escalated: record.escalated,
            }
        })
        .collect();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&rows)?),
        OutputFormat::Table => println!("{}", output::table(rows)),
        OutputFormat::Text => {
            for row in &rows {
                println!(
                    "  {}. {} -> {}{}",
                    row.position,
                    row.details,
                    row.kind,
                    if row.escalated { " (escalated)" } else { "" }
                );
            }
        }
    }

    Ok(())
}

/// Show the engine settings tree for the parameters' profile
pub fn settings(params_path: &Path, protocol: &str, _format: &str) -> anyhow::Result<()> {
    let params = PlaybackParameters::load(params_path)
        .with_context(|| format!("loading {}", params_path.display()))?;
    let player = &params.player_options;

    let settings = match protocol.parse::<Protocol>()? {
        Protocol::Hls => serde_json::Value::Object(hls_settings(
            player.player_profile,
            player.hlsjs_options.as_ref(),
            player.cap_level_to_player_size,
        )),
        Protocol::Dash => dash_settings(
            player.dashjs_options.as_ref(),
            player.cap_level_to_player_size,
            player.max_bitrate,
        ),
    };

    println!("{}", output::to_json(&settings)?);
    Ok(())
}

#[derive(Serialize, Tabled)]
struct ProfileRow {
    name: String,
    label: &'static str,
}

/// List player profiles
pub fn profiles(format: &str) -> anyhow::Result<()> {
    let rows: Vec<ProfileRow> = PlayerProfile::ALL
        .iter()
        .map(|profile| ProfileRow {
            name: profile.to_string(),
            label: profile.label(),
        })
        .collect();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&rows)?),
        OutputFormat::Table => println!("{}", output::table(rows)),
        OutputFormat::Text => {
            for row in &rows {
                println!("  {:<18} {}", row.name, row.label);
            }
        }
    }

    Ok(())
}

/// Print default parameters as a starting point for a parameters file
pub fn defaults() -> anyhow::Result<()> {
    println!("{}", output::to_json(&PlaybackParameters::default())?);
    Ok(())
}
