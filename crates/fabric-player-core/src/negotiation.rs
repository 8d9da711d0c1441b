//! Protocol / DRM negotiation
//!
//! Selects, from the offer matrix returned by content resolution, the single
//! protocol and DRM combination that is playable on this device. Pure and
//! deterministic: identical inputs always produce the identical choice.

use crate::types::{Drm, Protocol};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;
use url::Url;

/// Preference among protected schemes when the caller allows any DRM
const PROTECTED_PREFERENCE: [Drm; 5] = [
    Drm::Widevine,
    Drm::PlayReady,
    Drm::FairPlay,
    Drm::SampleAes,
    Drm::Aes128,
];

/// License endpoint data for one DRM scheme
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LicenseDescriptor {
    pub license_servers: Vec<String>,
    pub cert: Option<String>,
}

/// Playout descriptor for one (protocol, DRM) cell of the offer matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayoutMethod {
    pub playout_url: String,
    #[serde(default)]
    pub drms: HashMap<Drm, LicenseDescriptor>,
}

/// All DRM variants offered for a protocol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtocolOffer {
    pub playout_methods: BTreeMap<Drm, PlayoutMethod>,
}

/// Multiview capabilities advertised by the offering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiviewDescriptor {
    pub enabled: bool,
    pub available_views: Vec<String>,
}

/// Server-provided mapping of protocol to DRM to playout descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OfferMatrix {
    pub protocols: BTreeMap<Protocol, ProtocolOffer>,
    pub session_id: Option<String>,
    pub multiview: Option<MultiviewDescriptor>,
    pub thumbnail_track_url: Option<String>,
    /// Seconds trimmed from the start of the offering
    pub trim_offset: f64,
}

impl OfferMatrix {
    pub fn is_empty(&self) -> bool {
        self.protocols.values().all(|offer| offer.playout_methods.is_empty())
    }

    /// Insert a playout method, creating the protocol entry if needed
    pub fn insert(&mut self, protocol: Protocol, drm: Drm, method: PlayoutMethod) {
        self.protocols
            .entry(protocol)
            .or_default()
            .playout_methods
            .insert(drm, method);
    }
}

/// DRM schemes the current device/browser can decrypt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub drms: BTreeSet<Drm>,
}

impl DeviceCapabilities {
    pub fn new(drms: impl IntoIterator<Item = Drm>) -> Self {
        Self {
            drms: drms.into_iter().collect(),
        }
    }

    /// Clear playout needs no key system, so every device supports it
    pub fn supports(&self, drm: Drm) -> bool {
        drm.is_clear() || self.drms.contains(&drm)
    }
}

/// Outcome of a successful negotiation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub protocol: Protocol,
    pub drm: Drm,
    pub method: &'a PlayoutMethod,
}

/// Choose one playable (protocol, DRM) pair.
///
/// Protocols are tried in `allowed_protocols` order. For each protocol present
/// in the matrix, the usable DRMs are those offered, supported by the device
/// and (when `allowed_drms` is non-empty) allowed by the caller. An empty
/// allow-list prefers any protected scheme and falls back to clear; otherwise
/// the caller's order decides. A protocol with no usable DRM is dropped.
pub fn negotiate<'a>(
    offers: &'a OfferMatrix,
    allowed_protocols: &[Protocol],
    allowed_drms: &[Drm],
    device: &DeviceCapabilities,
) -> Result<Selection<'a>> {
    for protocol in allowed_protocols {
        let Some(offer) = offers.protocols.get(protocol) else {
            debug!(%protocol, "Protocol not offered");
            continue;
        };

        let usable = |drm: &Drm| offer.playout_methods.contains_key(drm) && device.supports(*drm);

        let drm = if allowed_drms.is_empty() {
            PROTECTED_PREFERENCE
                .iter()
                .copied()
                .find(|drm| usable(drm))
                .or_else(|| usable(&Drm::Clear).then_some(Drm::Clear))
        } else {
            allowed_drms.iter().copied().find(|drm| usable(drm))
        };

        match drm {
            Some(drm) => {
                let method = &offer.playout_methods[&drm];
                debug!(%protocol, %drm, "Negotiated playout method");
                return Ok(Selection { protocol: *protocol, drm, method });
            }
            None => debug!(%protocol, "No usable DRM for protocol, dropping"),
        }
    }

    Err(Error::NoPlayableCombination)
}

/// Fully resolved output of negotiation, consumed by engine attachment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegotiationResult {
    pub protocol: Protocol,
    pub drm: Drm,
    pub playout_url: Url,
    pub drm_license_descriptors: HashMap<Drm, LicenseDescriptor>,
    pub session_id: Option<String>,
    pub multiview: Option<MultiviewDescriptor>,
    pub thumbnail_track_url: Option<Url>,
    pub trim_offset: f64,
}

impl NegotiationResult {
    /// Negotiate against `offers` and resolve the chosen playout URL
    pub fn resolve(
        offers: &OfferMatrix,
        allowed_protocols: &[Protocol],
        allowed_drms: &[Drm],
        device: &DeviceCapabilities,
    ) -> Result<Self> {
        let selection = negotiate(offers, allowed_protocols, allowed_drms, device)?;

        let thumbnail_track_url = offers
            .thumbnail_track_url
            .as_deref()
            .map(Url::parse)
            .transpose()?;

        Ok(Self {
            protocol: selection.protocol,
            drm: selection.drm,
            playout_url: Url::parse(&selection.method.playout_url)?,
            drm_license_descriptors: selection.method.drms.clone(),
            session_id: offers.session_id.clone(),
            multiview: offers.multiview.clone(),
            thumbnail_track_url,
            trim_offset: offers.trim_offset,
        })
    }

    /// First license server configured for the negotiated DRM
    pub fn license_server(&self) -> Option<&str> {
        self.drm_license_descriptors
            .get(&self.drm)
            .and_then(|descriptor| descriptor.license_servers.first())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(url: &str) -> PlayoutMethod {
        PlayoutMethod {
            playout_url: url.to_string(),
            drms: HashMap::new(),
        }
    }

    fn matrix(cells: &[(Protocol, Drm)]) -> OfferMatrix {
        let mut offers = OfferMatrix::default();
        for (protocol, drm) in cells {
            offers.insert(*protocol, *drm, method(&format!("https://cdn.example.com/{protocol}/{drm}/playlist")));
        }
        offers
    }

    #[test]
    fn test_prefers_protected_scheme_when_any_drm_allowed() {
        let offers = matrix(&[
            (Protocol::Hls, Drm::Clear),
            (Protocol::Hls, Drm::Widevine),
            (Protocol::Dash, Drm::Clear),
        ]);
        let device = DeviceCapabilities::new([Drm::Widevine]);

        let selection = negotiate(&offers, &[Protocol::Hls, Protocol::Dash], &[], &device).unwrap();
        assert_eq!(selection.protocol, Protocol::Hls);
        assert_eq!(selection.drm, Drm::Widevine);
    }

    #[test]
    fn test_skips_protocol_absent_from_offer() {
        let offers = matrix(&[(Protocol::Hls, Drm::Clear)]);
        let device = DeviceCapabilities::default();

        let selection = negotiate(&offers, &[Protocol::Dash, Protocol::Hls], &[Drm::Clear], &device).unwrap();
        assert_eq!(selection.protocol, Protocol::Hls);
        assert_eq!(selection.drm, Drm::Clear);
    }

    #[test]
    fn test_empty_offer_fails() {
        let offers = OfferMatrix::default();
        let result = negotiate(&offers, &[Protocol::Hls, Protocol::Dash], &[], &DeviceCapabilities::default());
        assert!(matches!(result, Err(Error::NoPlayableCombination)));
    }

    #[test]
    fn test_unsupported_drm_drops_protocol() {
        let offers = matrix(&[(Protocol::Hls, Drm::FairPlay), (Protocol::Dash, Drm::Widevine)]);
        let device = DeviceCapabilities::new([Drm::Widevine]);

        let selection = negotiate(
            &offers,
            &[Protocol::Hls, Protocol::Dash],
            &[Drm::FairPlay, Drm::Widevine],
            &device,
        )
        .unwrap();
        assert_eq!(selection.protocol, Protocol::Dash);
        assert_eq!(selection.drm, Drm::Widevine);
    }

    #[test]
    fn test_caller_order_wins_when_allow_list_given() {
        let offers = matrix(&[(Protocol::Dash, Drm::Widevine), (Protocol::Dash, Drm::PlayReady)]);
        let device = DeviceCapabilities::new([Drm::Widevine, Drm::PlayReady]);

        let selection = negotiate(&offers, &[Protocol::Dash], &[Drm::PlayReady, Drm::Widevine], &device).unwrap();
        assert_eq!(selection.drm, Drm::PlayReady);
    }

    #[test]
    fn test_falls_back_to_clear_without_protected_support() {
        let offers = matrix(&[(Protocol::Hls, Drm::Clear), (Protocol::Hls, Drm::Widevine)]);
        let selection = negotiate(&offers, &[Protocol::Hls], &[], &DeviceCapabilities::default()).unwrap();
        assert_eq!(selection.drm, Drm::Clear);
    }

    #[test]
    fn test_negotiation_is_deterministic() {
        let offers = matrix(&[
            (Protocol::Hls, Drm::Aes128),
            (Protocol::Hls, Drm::Widevine),
            (Protocol::Dash, Drm::PlayReady),
        ]);
        let device = DeviceCapabilities::new([Drm::Widevine, Drm::PlayReady, Drm::Aes128]);
        let first = negotiate(&offers, &[Protocol::Dash, Protocol::Hls], &[], &device).unwrap();
        for _ in 0..10 {
            assert_eq!(negotiate(&offers, &[Protocol::Dash, Protocol::Hls], &[], &device).unwrap(), first);
        }
    }

    #[test]
    fn test_resolve_builds_full_result() {
        let mut offers = matrix(&[]);
        let mut drms = HashMap::new();
        drms.insert(
            Drm::Widevine,
            LicenseDescriptor {
                license_servers: vec!["https://license.example.com/wv".into()],
                cert: None,
            },
        );
        offers.insert(
            Protocol::Dash,
            Drm::Widevine,
            PlayoutMethod {
                playout_url: "https://cdn.example.com/dash/live.mpd?authorization=abc".into(),
                drms,
            },
        );
        offers.session_id = Some("sid-1".into());
        offers.trim_offset = 12.5;

        let result = NegotiationResult::resolve(
            &offers,
            &[Protocol::Hls, Protocol::Dash],
            &[],
            &DeviceCapabilities::new([Drm::Widevine]),
        )
        .unwrap();

        assert_eq!(result.protocol, Protocol::Dash);
        assert_eq!(result.license_server(), Some("https://license.example.com/wv"));
        assert_eq!(result.session_id.as_deref(), Some("sid-1"));
        assert_eq!(result.trim_offset, 12.5);
    }

    #[test]
    fn test_offer_matrix_json_shape() {
        let json = r#"{
            "protocols": {
                "hls": { "playoutMethods": { "clear": { "playoutUrl": "https://cdn.example.com/a.m3u8" } } }
            },
            "sessionId": "abc"
        }"#;
        let offers: OfferMatrix = serde_json::from_str(json).unwrap();
        assert!(!offers.is_empty());
        assert!(offers.protocols[&Protocol::Hls].playout_methods.contains_key(&Drm::Clear));
    }
}
