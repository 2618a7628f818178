//! Gallery documents handed to the pipeline by the metadata service.
//!
//! Only the ordered artwork list matters to the cache; the rest is carried so
//! drivers can log and display it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::asset::AssetKey;

/// Display metadata for one artwork. `image` is the asset URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkMetadata {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One entry of a gallery.
///
/// `local_id` is assigned on load for UI identity and is ignored by
/// equality and serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkItem {
    #[serde(skip, default = "Uuid::new_v4")]
    pub local_id: Uuid,
    pub metadata: ArtworkMetadata,
    pub chain: String,
    pub contract_address: String,
    pub token_id: String,
}

impl ArtworkItem {
    pub fn asset_key(&self) -> AssetKey {
        AssetKey::from(self.metadata.image.as_str())
    }

    pub fn url(&self) -> &str {
        &self.metadata.image
    }
}

impl PartialEq for ArtworkItem {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata
            && self.chain == other.chain
            && self.contract_address == other.contract_address
            && self.token_id == other.token_id
    }
}

impl Eq for ArtworkItem {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    pub id: Uuid,
    pub human_readable_id: String,
    #[serde(default)]
    pub artworks: Option<Vec<ArtworkItem>>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Gallery {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn artworks(&self) -> &[ArtworkItem] {
        self.artworks.as_deref().unwrap_or_default()
    }

    /// Ordered asset keys, one per artwork.
    pub fn asset_keys(&self) -> Vec<AssetKey> {
        self.artworks().iter().map(ArtworkItem::asset_key).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.artworks().is_empty()
    }
}

/// Normalise a user-typed gallery id: trimmed, lowercase, no spaces.
pub fn normalize_gallery_id(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "")
}

/// RFC 3339 with or without fractional seconds, `+0000` style offsets, or a
/// bare timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("cannot decode date string {raw}"))
    })
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!("cannot decode date string {raw}"))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "id": "5b7c1e0e-8d4b-4b8e-9a37-0c7f7f0e2a11",
        "human_readable_id": "sunny-otter-42",
        "artworks": [
            {
                "metadata": {"image": "https://cdn.example/a.gif", "name": "A"},
                "chain": "ethereum",
                "contractAddress": "0xabc",
                "tokenId": "1"
            },
            {
                "metadata": {"image": "https://cdn.example/b.png", "name": null, "description": "second"},
                "chain": "base",
                "contractAddress": "0xdef",
                "tokenId": "2"
            }
        ],
        "created_at": "2025-07-14T09:12:33.123456+00:00",
        "updated_at": "2025-07-14T09:12:33+0000",
        "last_accessed_at": null,
        "is_active": true
    }"#;

    #[test]
    fn parses_document_and_orders_keys() {
        let gallery = Gallery::from_json(DOCUMENT).expect("parse");
        assert_eq!(gallery.human_readable_id, "sunny-otter-42");
        assert_eq!(
            gallery.asset_keys(),
            vec![
                AssetKey::from("https://cdn.example/a.gif"),
                AssetKey::from("https://cdn.example/b.png"),
            ]
        );
        assert_eq!(gallery.artworks()[1].metadata.description.as_deref(), Some("second"));
        assert!(gallery.last_accessed_at.is_none());
        assert_eq!(gallery.created_at.timestamp(), gallery.updated_at.timestamp());
    }

    #[test]
    fn missing_artworks_is_an_empty_gallery() {
        let gallery = Gallery::from_json(
            r#"{"id":"5b7c1e0e-8d4b-4b8e-9a37-0c7f7f0e2a11","human_readable_id":"x",
                "created_at":"2025-07-14T09:12:33Z","updated_at":"2025-07-14T09:12:33Z",
                "is_active":false}"#,
        )
        .expect("parse");
        assert!(gallery.is_empty());
        assert!(gallery.asset_keys().is_empty());
    }

    #[test]
    fn artwork_equality_ignores_local_identity() {
        let gallery = Gallery::from_json(DOCUMENT).expect("parse");
        let mut copy = gallery.artworks()[0].clone();
        copy.local_id = Uuid::new_v4();
        assert_ne!(copy.local_id, gallery.artworks()[0].local_id);
        assert_eq!(copy, gallery.artworks()[0]);
    }

    #[test]
    fn gallery_ids_are_normalized() {
        assert_eq!(normalize_gallery_id("  Sunny Otter 42\n"), "sunnyotter42");
    }
}
