//! Sticker records from the store's `data-preview` attribute.
//!
//! A preview looks like
//! `{"type":"animation","id":"123","staticUrl":"…","fallbackStaticUrl":"…","animationUrl":"…","popupUrl":""}`.

use crate::errors::{PackError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickerKind {
    Static,
    Animated,
}

/// Preview types that carry an animation.
const ANIMATED_TYPES: &[&str] = &["animation", "popup", "animation_sound", "popup_sound"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRecord {
    pub id: String,
    /// The asset to save as the sticker itself: the animation for animated
    /// stickers, the still image otherwise.
    pub primary_url: String,
    pub static_url: Option<String>,
    pub fallback_static_url: Option<String>,
    pub kind: StickerKind,
}

impl StickerRecord {
    pub fn is_animated(&self) -> bool {
        self.kind == StickerKind::Animated
    }

    /// Still-image URLs to try for the key frame, in order.
    pub fn key_urls(&self) -> impl Iterator<Item = &str> {
        self.static_url
            .iter()
            .chain(self.fallback_static_url.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPreview {
    #[serde(rename = "type", default)]
    kind: String,
    id: RawId,
    #[serde(default)]
    static_url: Option<String>,
    #[serde(default)]
    fallback_static_url: Option<String>,
    #[serde(default)]
    animation_url: Option<String>,
    #[serde(default)]
    popup_url: Option<String>,
}

fn non_empty(url: Option<String>) -> Option<String> {
    url.map(|u| clean_url(&u)).filter(|u| !u.is_empty())
}

impl TryFrom<RawPreview> for StickerRecord {
    type Error = PackError;

    fn try_from(raw: RawPreview) -> Result<Self> {
        let id = match raw.id {
            RawId::Text(s) => s.trim().to_string(),
            RawId::Number(n) => n.to_string(),
        };
        if id.is_empty() {
            return Err(PackError::InvalidRecord("empty sticker id".to_string()));
        }
        let static_url = non_empty(raw.static_url);
        let fallback_static_url = non_empty(raw.fallback_static_url);

        let animated = ANIMATED_TYPES.contains(&raw.kind.as_str());
        let (kind, primary) = if animated {
            let primary = non_empty(raw.animation_url).or_else(|| non_empty(raw.popup_url));
            (StickerKind::Animated, primary)
        } else {
            (
                StickerKind::Static,
                static_url.clone().or_else(|| fallback_static_url.clone()),
            )
        };
        let primary_url = primary.ok_or_else(|| {
            PackError::InvalidRecord(format!("sticker {} ({}) has no usable URL", id, raw.kind))
        })?;

        Ok(StickerRecord {
            id,
            primary_url,
            static_url,
            fallback_static_url,
            kind,
        })
    }
}

/// Parses one `data-preview` JSON object.
pub fn parse_preview(json: &str) -> Result<StickerRecord> {
    let raw: RawPreview = serde_json::from_str(json)?;
    StickerRecord::try_from(raw)
}

/// Parses a JSON array of preview objects.
pub fn parse_records(json: &str) -> Result<Vec<StickerRecord>> {
    let raw: Vec<RawPreview> = serde_json::from_str(json)?;
    raw.into_iter().map(StickerRecord::try_from).collect()
}

/// Drops query, fragment and `;compress=true`-style suffixes.
pub fn clean_url(url: &str) -> String {
    let end = url.find(['?', '#', ';']).unwrap_or(url.len());
    url[..end].trim().to_string()
}

/// One record per id in first-seen order. An animated record replaces a
/// static one with the same id.
pub fn dedupe_by_id(records: Vec<StickerRecord>) -> Vec<StickerRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<StickerRecord> = Vec::with_capacity(records.len());
    for record in records {
        match position.get(&record.id) {
            Some(&i) => {
                if record.is_animated() && !kept[i].is_animated() {
                    kept[i] = record;
                }
            }
            None => {
                position.insert(record.id.clone(), kept.len());
                kept.push(record);
            }
        }
    }
    kept
}
