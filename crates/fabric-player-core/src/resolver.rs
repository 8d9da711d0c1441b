//! Content resolution collaborator
//!
//! The content fabric client that turns object identifiers into playout offers
//! is external to the player. Sessions consume it through [`ContentResolver`];
//! every call is async and fallible, and is only retried as part of a reload.

use crate::engine::RequestModifier;
use crate::negotiation::OfferMatrix;
use crate::params::{MediaCollectionOptions, PlayoutParameters};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Identifiers and playout options sent with an offering request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferingRequest {
    pub object_id: Option<String>,
    pub version_hash: Option<String>,
    pub write_token: Option<String>,
    pub link_path: Option<String>,
    pub offering: Option<String>,
    pub handler: String,
    pub authorization_token: Option<String>,
    pub options: PlayoutOptions,
}

/// Clip and trim hints forwarded with the request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayoutOptions {
    pub clip_start: Option<f64>,
    pub clip_end: Option<f64>,
    pub ignore_trimming: bool,
    pub resolve: bool,
    pub direct_link: bool,
}

impl OfferingRequest {
    /// Build a request; an active collection item's hash replaces the source version hash
    pub fn from_playout(params: &PlayoutParameters, active_media_hash: Option<&str>) -> Self {
        let clipped = params.clip_start.is_some() || params.clip_end.is_some();

        Self {
            object_id: params.object_id.clone(),
            version_hash: active_media_hash
                .map(str::to_string)
                .or_else(|| params.version_hash.clone()),
            write_token: params.write_token.clone(),
            link_path: params.link_path.clone(),
            offering: params.offering.clone(),
            handler: params.handler.clone(),
            authorization_token: params.authorization_token.clone(),
            options: PlayoutOptions {
                clip_start: clipped.then(|| params.clip_start.unwrap_or(0.0)),
                clip_end: params.clip_end,
                ignore_trimming: params.ignore_trimming,
                resolve: params.resolve,
                direct_link: params.direct_link,
            },
        }
    }
}

/// Media catalog holding a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRef {
    pub object_id: Option<String>,
    pub version_hash: Option<String>,
}

impl CatalogRef {
    pub fn from_options(options: &MediaCollectionOptions) -> Option<Self> {
        if options.media_catalog_object_id.is_none() && options.media_catalog_version_hash.is_none() {
            return None;
        }
        Some(Self {
            object_id: options.media_catalog_object_id.clone(),
            version_hash: options.media_catalog_version_hash.clone(),
        })
    }

    /// Identifier used in messages
    pub fn display_id(&self) -> &str {
        self.object_id
            .as_deref()
            .or(self.version_hash.as_deref())
            .unwrap_or_default()
    }
}

/// One entry of a collection or playlist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionItem {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Fabric link to the media object, e.g. `/qfab/hq__abc/meta/...`
    pub media_link: Option<String>,
}

impl CollectionItem {
    /// Version hash embedded in the media link
    pub fn media_hash(&self) -> Option<&str> {
        self.media_link
            .as_deref()?
            .split('/')
            .find(|segment| segment.starts_with("hq__"))
    }
}

/// Outcome of content verification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// Resolver-specific audit details
    pub details: serde_json::Value,
}

#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Fetch the protocol/DRM offer matrix for the requested content
    async fn resolve_offering(&self, request: &OfferingRequest) -> Result<OfferMatrix>;

    /// Content-specific explanation for a permission failure
    async fn resolve_permission_message(&self, request: &OfferingRequest) -> Result<Option<String>>;

    /// Ordered items of a collection in a media catalog
    async fn resolve_collection_items(&self, catalog: &CatalogRef, collection_id: &str) -> Result<Vec<CollectionItem>>;

    async fn verify_content(&self, _request: &OfferingRequest) -> Result<VerificationResult> {
        Ok(VerificationResult::default())
    }

    /// Drop cached endpoint selection so the next call picks a fresh region
    async fn reset_region(&self) -> Result<()> {
        Ok(())
    }
}

/// Fetch an offer matrix published as JSON, e.g. by an edge cache
pub async fn fetch_offer_matrix(
    client: &reqwest::Client,
    url: &Url,
    authorization: Option<&RequestModifier>,
) -> Result<OfferMatrix> {
    debug!(%url, "Fetching offer matrix");

    let mut request = client.get(url.clone());
    if let Some(modifier) = authorization {
        request = request.headers(modifier.headers().clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::resolution(e.to_string(), e.status().map(|s| s.as_u16())))?;

    let status = response.status();
    if !status.is_success() {
        return Err(match status.as_u16() {
            code @ (401 | 403) => Error::PermissionDenied { status: code, message: None },
            code => Error::resolution(format!("offer request failed with {status}"), Some(code)),
        });
    }

    response
        .json::<OfferMatrix>()
        .await
        .map_err(|e| Error::resolution(e.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_media_hash_overrides_version() {
        let params = PlayoutParameters {
            version_hash: Some("hq__source".into()),
            ..Default::default()
        };
        let request = OfferingRequest::from_playout(&params, Some("hq__item"));
        assert_eq!(request.version_hash.as_deref(), Some("hq__item"));
        assert_eq!(request.handler, "playout");
    }

    #[test]
    fn test_clip_end_implies_zero_start() {
        let params = PlayoutParameters {
            clip_end: Some(30.0),
            ..Default::default()
        };
        let request = OfferingRequest::from_playout(&params, None);
        assert_eq!(request.options.clip_start, Some(0.0));
        assert_eq!(request.options.clip_end, Some(30.0));

        let unclipped = OfferingRequest::from_playout(&PlayoutParameters::default(), None);
        assert_eq!(unclipped.options.clip_start, None);
    }

    #[test]
    fn test_collection_item_media_hash() {
        let item = CollectionItem {
            id: "a".into(),
            media_link: Some("/qfab/hq__abc123/meta/public".into()),
            ..Default::default()
        };
        assert_eq!(item.media_hash(), Some("hq__abc123"));

        let unlinked = CollectionItem { id: "b".into(), ..Default::default() };
        assert_eq!(unlinked.media_hash(), None);
    }

    #[test]
    fn test_catalog_requires_identifier() {
        assert!(CatalogRef::from_options(&MediaCollectionOptions::default()).is_none());
        let catalog = CatalogRef::from_options(&MediaCollectionOptions {
            media_catalog_version_hash: Some("hq__cat".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(catalog.display_id(), "hq__cat");
    }
}
