use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// BOOTH item ids live in a bounded range; anything outside is rejected
/// before a fetch is even attempted.
pub const ITEM_ID_MIN: u64 = 1_000_000;
pub const ITEM_ID_MAX: u64 = 99_999_999;

pub fn is_valid_item_id(item_id: u64) -> bool {
    (ITEM_ID_MIN..=ITEM_ID_MAX).contains(&item_id)
}

/// Raw worklist entry as loaded from an input file, before any fetching.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawItem {
    pub item_id: u64,
    pub name: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub variation: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub wish_price: Option<u64>,
}

impl RawItem {
    pub fn new(item_id: u64) -> Self {
        Self {
            item_id,
            url: Some(item_page_url(item_id)),
            ..Self::default()
        }
    }
}

pub fn item_canonical_path(item_id: u64) -> String {
    format!("/ja/items/{item_id}")
}

pub fn item_page_url(item_id: u64) -> String {
    format!("https://booth.pm{}", item_canonical_path(item_id))
}

/// One cache record per item id. Failures are data, not errors: a failed
/// resolution produces a record whose `error` field is set.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ItemMetadata {
    pub item_id: u64,
    pub name: Option<String>,
    pub shop_name: Option<String>,
    pub creator_id: Option<String>,
    pub image_url: Option<String>,
    pub current_price: Option<u64>,
    pub description_excerpt: Option<String>,
    pub canonical_path: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub related_item_ids: Vec<u64>,
    pub scraped_at: String,
    pub page_updated_at: Option<String>,
    pub content_hash: Option<String>,
    pub error: Option<String>,
}

impl ItemMetadata {
    pub fn new(item_id: u64) -> Self {
        Self {
            item_id,
            name: None,
            shop_name: None,
            creator_id: None,
            image_url: None,
            current_price: None,
            description_excerpt: None,
            canonical_path: item_canonical_path(item_id),
            files: Vec::new(),
            related_item_ids: Vec::new(),
            scraped_at: now_timestamp(),
            page_updated_at: None,
            content_hash: None,
            error: None,
        }
    }

    pub fn with_error(item_id: u64, message: impl Into<String>) -> Self {
        let mut metadata = Self::new(item_id);
        metadata.error = Some(message.into());
        metadata
    }

    /// Not-found records never expire from the cache; everything else is
    /// retried after the suppression window.
    pub fn has_permanent_error(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|message| message.to_lowercase().contains("not found"))
    }

    pub fn page_url(&self) -> String {
        format!("https://booth.pm{}", self.canonical_path)
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Canonical reference to a supported avatar: code plus Japanese display name.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AvatarRef {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileAsset {
    pub filename: String,
    pub version: Option<String>,
}

/// Virtual sub-item synthesized from a set listing. `subitem_id` is the
/// contractual `{parent}#variant:{code}:{slug}` form and must be stable
/// across runs for identical inputs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Variant {
    pub subitem_id: String,
    pub parent_item_id: u64,
    pub variant_name: String,
    pub targets: Vec<AvatarRef>,
    #[serde(default)]
    pub files: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Avatar,
    Costume,
    Accessory,
    Tool,
    Gimmick,
    World,
    Texture,
    Scenario,
    Bundle,
    Other,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Costume => "costume",
            Self::Accessory => "accessory",
            Self::Tool => "tool",
            Self::Gimmick => "gimmick",
            Self::World => "world",
            Self::Texture => "texture",
            Self::Scenario => "scenario",
            Self::Bundle => "bundle",
            Self::Other => "other",
        }
    }
}

/// Final catalog entry handed to the export layer. Field names and nesting
/// are fixed; the downstream renderer has no tolerance for schema drift.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Item {
    pub item_id: u64,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub name: String,
    pub shop_name: Option<String>,
    pub creator_id: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub current_price: Option<u64>,
    pub description_excerpt: Option<String>,
    pub files: Vec<FileAsset>,
    pub targets: Vec<AvatarRef>,
    pub tags: Vec<String>,
    pub updated_at: Option<String>,
    pub variants: Vec<Variant>,
}

#[cfg(test)]
mod tests {
    use super::{ItemMetadata, ItemType, is_valid_item_id, item_page_url};

    #[test]
    fn item_id_range_is_inclusive() {
        assert!(is_valid_item_id(1_000_000));
        assert!(is_valid_item_id(99_999_999));
        assert!(!is_valid_item_id(999_999));
        assert!(!is_valid_item_id(100_000_000));
    }

    #[test]
    fn metadata_defaults_fill_canonical_path() {
        let metadata = ItemMetadata::new(4_200_000);
        assert_eq!(metadata.canonical_path, "/ja/items/4200000");
        assert_eq!(metadata.page_url(), "https://booth.pm/ja/items/4200000");
        assert!(metadata.error.is_none());
    }

    #[test]
    fn permanent_errors_are_detected_from_message() {
        let not_found = ItemMetadata::with_error(1_000_004, "item 1000004 not found (404)");
        assert!(not_found.has_permanent_error());

        let timeout = ItemMetadata::with_error(1_000_004, "fetch failed: timed out");
        assert!(!timeout.has_permanent_error());
    }

    #[test]
    fn item_type_serializes_lowercase() {
        let json = serde_json::to_string(&ItemType::Costume).expect("serialize");
        assert_eq!(json, "\"costume\"");
    }

    #[test]
    fn page_url_matches_booth_layout() {
        assert_eq!(item_page_url(1234567), "https://booth.pm/ja/items/1234567");
    }
}
