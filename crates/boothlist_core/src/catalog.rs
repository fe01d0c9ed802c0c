use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::avatar::AvatarDictionary;
use crate::decompose::DecomposeEngine;
use crate::fetch::FetchContext;
use crate::model::{AvatarRef, FileAsset, Item, ItemMetadata, ItemType, RawItem};

/// Category labels BOOTH uses, English and Japanese, mapped to the
/// normalized type vocabulary.
const CATEGORY_MAPPING: &[(&str, ItemType)] = &[
    ("3D Avatar", ItemType::Avatar),
    ("3D Clothing", ItemType::Costume),
    ("3D Accessory", ItemType::Accessory),
    ("Tool", ItemType::Tool),
    ("Gimmick", ItemType::Gimmick),
    ("World", ItemType::World),
    ("Texture", ItemType::Texture),
    ("Scenario", ItemType::Scenario),
    ("Bundle", ItemType::Bundle),
    ("アバター", ItemType::Avatar),
    ("衣装", ItemType::Costume),
    ("アクセサリ", ItemType::Accessory),
    ("アクセサリー", ItemType::Accessory),
    ("ツール", ItemType::Tool),
    ("ギミック", ItemType::Gimmick),
    ("ワールド", ItemType::World),
    ("テクスチャ", ItemType::Texture),
    ("素材", ItemType::Texture),
    ("シナリオ", ItemType::Scenario),
    ("セット", ItemType::Bundle),
];

const TYPE_KEYWORDS: &[(ItemType, &[&str])] = &[
    (ItemType::Avatar, &["avatar", "アバター", "3dアバター", "3d avatar"]),
    (
        ItemType::Costume,
        &["costume", "衣装", "clothing", "dress", "outfit", "コスチューム", "ワンピース", "服装"],
    ),
    (
        ItemType::Accessory,
        &["accessory", "アクセサリ", "hair", "ヘア", "髪型", "hat", "帽子", "glasses", "メガネ"],
    ),
    (
        ItemType::Texture,
        &["texture", "テクスチャ", "素材", "material", "skin", "スキン", "nail", "ネイル"],
    ),
    (
        ItemType::Gimmick,
        &["gimmick", "ギミック", "script", "スクリプト", "animation", "アニメーション"],
    ),
    (
        ItemType::World,
        &["world", "ワールド", "scene", "シーン", "背景", "background"],
    ),
    (
        ItemType::Tool,
        &["tool", "ツール", "unity", "blender", "editor", "エディタ"],
    ),
    (
        ItemType::Scenario,
        &["scenario", "シナリオ", "story", "ストーリー", "物語"],
    ),
];

/// Map a raw category label to a normalized type. Unknown labels fall
/// through to partial matching, then `Other`.
pub fn normalize_type(category: Option<&str>) -> ItemType {
    let Some(category) = category else {
        return ItemType::Other;
    };
    for (label, item_type) in CATEGORY_MAPPING {
        if category.eq_ignore_ascii_case(label) {
            return *item_type;
        }
    }
    let lowered = category.to_lowercase();
    if lowered.contains("avatar") || lowered.contains("アバター") {
        ItemType::Avatar
    } else if lowered.contains("costume") || lowered.contains("衣装") {
        ItemType::Costume
    } else if lowered.contains("accessor") || lowered.contains("アクセサリ") {
        ItemType::Accessory
    } else if lowered.contains("tool") || lowered.contains("ツール") {
        ItemType::Tool
    } else if lowered.contains("world") || lowered.contains("ワールド") {
        ItemType::World
    } else {
        tracing::debug!(category, "unknown category");
        ItemType::Other
    }
}

/// Keyword fallback when the input carried no usable category.
pub fn infer_type_from_text(name: &str, description: Option<&str>) -> ItemType {
    let combined = format!("{name} {}", description.unwrap_or("")).to_lowercase();
    for (item_type, keywords) in TYPE_KEYWORDS {
        if keywords.iter().any(|keyword| combined.contains(keyword)) {
            return *item_type;
        }
    }
    ItemType::Other
}

/// `v1.2` / `Ver1.00` style version markers inside a filename.
pub fn extract_version(filename: &str) -> Option<String> {
    let captures = version_re()
        .captures(filename)
        .or_else(|| bare_version_re().captures(filename))?;
    Some(captures[1].to_string())
}

pub fn normalize_files(filenames: &[String]) -> Vec<FileAsset> {
    filenames
        .iter()
        .filter(|filename| !filename.is_empty())
        .map(|filename| FileAsset {
            filename: filename.clone(),
            version: extract_version(filename),
        })
        .collect()
}

/// Permanent not-found records drop the item from the catalog entirely.
pub fn should_skip(metadata: &ItemMetadata) -> bool {
    metadata.has_permanent_error()
}

/// An avatar listing with no detected targets usually names its own avatar
/// in the title; claim the first dictionary hit.
fn auto_assign_avatar_target(
    name: &str,
    description: Option<&str>,
    dictionary: &AvatarDictionary,
) -> Vec<AvatarRef> {
    let combined = format!("{name} {}", description.unwrap_or(""));
    let lowered = combined.to_lowercase();
    for entry in dictionary.entries() {
        let hit = dictionary
            .alias_tokens(entry)
            .iter()
            .any(|token| lowered.contains(token));
        if hit {
            if let Some(avatar) = dictionary.by_code(entry.code) {
                return vec![avatar];
            }
        }
    }
    Vec::new()
}

/// Assemble one catalog entry from the worklist row, the resolved page
/// metadata, and the decomposition output. Targets are the union of the
/// variant targets, ordered by code.
pub fn build_item(
    raw: &RawItem,
    metadata: &ItemMetadata,
    variants: Vec<crate::model::Variant>,
    dictionary: &AvatarDictionary,
) -> Item {
    let name = metadata
        .name
        .clone()
        .or_else(|| raw.name.clone())
        .unwrap_or_else(|| format!("Item {}", raw.item_id));

    let mut item_type = normalize_type(raw.category.as_deref());
    if item_type == ItemType::Other {
        item_type = infer_type_from_text(&name, metadata.description_excerpt.as_deref());
    }

    let filenames = if metadata.files.is_empty() {
        &raw.files
    } else {
        &metadata.files
    };

    let mut targets: Vec<AvatarRef> = Vec::new();
    for variant in &variants {
        for target in &variant.targets {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
    }
    targets.sort_by(|a, b| a.code.cmp(&b.code));
    if item_type == ItemType::Avatar && targets.is_empty() {
        targets = auto_assign_avatar_target(
            &name,
            metadata.description_excerpt.as_deref(),
            dictionary,
        );
    }

    Item {
        item_id: raw.item_id,
        item_type,
        name,
        shop_name: metadata.shop_name.clone(),
        creator_id: metadata.creator_id.clone(),
        image_url: metadata.image_url.clone(),
        url: Some(metadata.page_url()),
        current_price: metadata.current_price,
        description_excerpt: metadata.description_excerpt.clone(),
        files: normalize_files(filenames),
        targets,
        tags: Vec::new(),
        updated_at: metadata
            .page_updated_at
            .clone()
            .or_else(|| Some(metadata.scraped_at.clone())),
        variants,
    }
}

/// Resolve, decompose and normalize the whole worklist. Each top-level item
/// starts a fresh visited set so one item's traversal never starves a
/// sibling of its related-item signal.
pub fn build_catalog(
    raw_items: &[RawItem],
    fetch: &mut FetchContext,
    dictionary: &AvatarDictionary,
    max_depth: usize,
) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    for raw in raw_items {
        let metadata = fetch.resolve(raw.item_id)?;
        if should_skip(&metadata) {
            tracing::warn!(
                item_id = raw.item_id,
                error = metadata.error.as_deref().unwrap_or(""),
                "skipping item"
            );
            continue;
        }

        let mut visited = HashSet::new();
        let variants = DecomposeEngine::new(fetch, dictionary)
            .with_max_depth(max_depth)
            .decompose(raw.item_id, &raw.files, &mut visited, 0)?;

        items.push(build_item(raw, &metadata, variants, dictionary));
    }
    tracing::info!(count = items.len(), "catalog built");
    Ok(items)
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)v(?:er)?(\d+(?:\.\d+)*)").expect("static pattern"))
}

fn bare_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_(\d+\.\d+)(?:[._]|$)").expect("static pattern"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        build_catalog, build_item, extract_version, infer_type_from_text, normalize_type,
        should_skip,
    };
    use crate::avatar::AvatarDictionary;
    use crate::cache::MetadataCache;
    use crate::fetch::testing::ScriptedTransport;
    use crate::fetch::{FetchContext, FetchOptions};
    use crate::model::{ItemMetadata, ItemType, RawItem, item_page_url};

    fn context(transport: ScriptedTransport) -> FetchContext {
        let cache = MetadataCache::open_in_memory().expect("cache");
        let options = FetchOptions {
            rate_limit: Duration::ZERO,
            retries: 1,
            backoff_base: Duration::ZERO,
            force_refresh: false,
        };
        FetchContext::new(cache, Box::new(transport), options)
    }

    #[test]
    fn category_labels_map_in_both_languages() {
        assert_eq!(normalize_type(Some("3D Clothing")), ItemType::Costume);
        assert_eq!(normalize_type(Some("衣装")), ItemType::Costume);
        assert_eq!(normalize_type(Some("アクセサリー")), ItemType::Accessory);
        assert_eq!(normalize_type(Some("セット")), ItemType::Bundle);
        assert_eq!(normalize_type(Some("tool")), ItemType::Tool);
        assert_eq!(normalize_type(Some("謎のジャンル")), ItemType::Other);
        assert_eq!(normalize_type(None), ItemType::Other);
    }

    #[test]
    fn partial_category_matching_catches_composites() {
        assert_eq!(normalize_type(Some("VRChat Avatar Items")), ItemType::Avatar);
        assert_eq!(normalize_type(Some("ワールド素材集")), ItemType::World);
    }

    #[test]
    fn keyword_inference_orders_avatar_before_costume() {
        assert_eq!(infer_type_from_text("オリジナル3Dアバター", None), ItemType::Avatar);
        assert_eq!(infer_type_from_text("ワンピース", None), ItemType::Costume);
        assert_eq!(
            infer_type_from_text("謎の商品", Some("Unity用のeditor拡張")),
            ItemType::Tool
        );
        assert_eq!(infer_type_from_text("謎の商品", None), ItemType::Other);
    }

    #[test]
    fn version_markers_are_recognized() {
        assert_eq!(extract_version("Kikyo_Set_v1.2.zip").as_deref(), Some("1.2"));
        assert_eq!(extract_version("Outfit_Ver1.00.zip").as_deref(), Some("1.00"));
        assert_eq!(extract_version("Texture_2.0.unitypackage").as_deref(), Some("2.0"));
        assert_eq!(extract_version("plain.zip"), None);
    }

    #[test]
    fn permanent_errors_skip_the_item() {
        let gone = ItemMetadata::with_error(1_000_000, "item 1000000 not found (404)");
        assert!(should_skip(&gone));
        let flaky = ItemMetadata::with_error(1_000_000, "fetch failed: timeout");
        assert!(!should_skip(&flaky));
        assert!(!should_skip(&ItemMetadata::new(1_000_000)));
    }

    #[test]
    fn avatar_items_claim_their_own_avatar_target() {
        let raw = RawItem {
            item_id: 1_000_000,
            category: Some("3D Avatar".to_string()),
            ..RawItem::default()
        };
        let mut metadata = ItemMetadata::new(1_000_000);
        metadata.name = Some("オリジナル3Dアバター「マヌカ」".to_string());
        let dictionary = AvatarDictionary::new();
        let item = build_item(&raw, &metadata, Vec::new(), &dictionary);
        assert_eq!(item.item_type, ItemType::Avatar);
        assert_eq!(item.targets.len(), 1);
        assert_eq!(item.targets[0].code, "Manuka");
    }

    #[test]
    fn item_fields_prefer_page_metadata_over_hints() {
        let raw = RawItem {
            item_id: 1_000_001,
            name: Some("worklist name".to_string()),
            files: vec!["hint.zip".to_string()],
            ..RawItem::default()
        };
        let mut metadata = ItemMetadata::new(1_000_001);
        metadata.name = Some("page name".to_string());
        metadata.shop_name = Some("shop".to_string());
        metadata.files = vec!["page_v2.zip".to_string()];
        let dictionary = AvatarDictionary::new();
        let item = build_item(&raw, &metadata, Vec::new(), &dictionary);
        assert_eq!(item.name, "page name");
        assert_eq!(item.url.as_deref(), Some("https://booth.pm/ja/items/1000001"));
        assert_eq!(item.files.len(), 1);
        assert_eq!(item.files[0].filename, "page_v2.zip");
        assert_eq!(item.files[0].version.as_deref(), Some("2"));
        assert_eq!(item.updated_at, Some(metadata.scraped_at));
    }

    #[test]
    fn catalog_build_decomposes_and_skips_missing_items() {
        let (transport, script) = ScriptedTransport::new();
        {
            let mut script = script.borrow_mut();
            script.insert_page(
                &item_page_url(1_000_000),
                r#"<html><head><meta property="og:title" content="Marshmallow Set"></head>
                   <body><div class="item-description">対応アバター: 桔梗</div></body></html>"#,
            );
            // 1000001 has no scripted page; every attempt errors, which is
            // recorded as a transient failure, not a permanent skip.
        }
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let raw_items = vec![
            RawItem {
                item_id: 1_000_000,
                category: Some("衣装".to_string()),
                ..RawItem::default()
            },
            RawItem::new(1_000_001),
        ];

        let items = build_catalog(&raw_items, &mut fetch, &dictionary, 2).expect("catalog");

        assert_eq!(items.len(), 2);
        let set = &items[0];
        assert_eq!(set.item_type, ItemType::Costume);
        assert_eq!(set.name, "Marshmallow Set");
        assert_eq!(set.variants.len(), 1);
        assert_eq!(set.targets.len(), 1);
        assert_eq!(set.targets[0].code, "Kikyo");
        let unreachable = &items[1];
        assert_eq!(unreachable.name, "Item 1000001");
        assert!(unreachable.variants.is_empty());
    }
}
