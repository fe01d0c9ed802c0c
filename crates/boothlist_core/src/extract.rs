use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::model::{ItemMetadata, is_valid_item_id};

pub const DESCRIPTION_EXCERPT_CHARS: usize = 200;

// Ordered fallback chains, highest fidelity first. Each field walks its own
// table independently; a miss in one source never disqualifies another field.
const NAME_SELECTORS: &[&str] = &[
    "h1.item-name",
    "h1.u-tpg-title1",
    r#"h1[itemprop="name"]"#,
    ".item-name h1",
    ".item-header h1",
    r#"h1[data-tracking-label="item_name"]"#,
];

const SHOP_SELECTORS: &[&str] = &[
    "a.shop-name",
    "div.u-text-ellipsis > a",
    r#"a[itemprop="author"]"#,
    ".shop-name",
    ".booth-user-name a",
    ".user-name a",
];

const SHOP_LINK_SELECTORS: &[&str] = &[
    "a.shop-name",
    "div.u-text-ellipsis > a",
    r#"a[itemprop="author"]"#,
    ".booth-user-name a",
];

const PRICE_SELECTORS: &[&str] = &[
    "div.price",
    r#"span[itemprop="price"]"#,
    ".price .yen",
    ".item-price .yen",
    ".current-price .yen",
    ".price-tag .yen",
];

const FREE_TEXT_SELECTORS: &[&str] = &[".item-description", ".item-detail", ".item-header"];

const IMAGE_SELECTORS: &[&str] = &[
    "img.market-item-image",
    "img.market-item-detail-image",
    "div.item-image img",
    "div.main-image img",
    ".image-container img",
    ".product-image img",
    ".item-gallery img",
    ".booth-image img",
    "img.item-image",
    "img.main-image",
    r#"img[itemprop="image"]"#,
    r#"img[class*="main"]"#,
    r#"img[class*="primary"]"#,
    ".item-detail img",
    "main img",
    "article img",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    ".item-description .markdown",
    ".item-description",
    ".description .markdown",
    ".item-detail-description",
    ".booth-description",
    ".item-body",
];

const FILE_SELECTORS: &[&str] = &[
    ".download-list .file-name",
    ".file-list .file-name",
    ".attachment-list .file-name",
    ".download-item .filename",
    ".file-item .name",
];

const RELATED_CONTENT_SELECTORS: &[&str] = &[
    ".item-description",
    ".item-detail-description",
    ".booth-description",
    ".item-body",
    ".markdown",
    ".related-items",
];

/// Best-effort extraction of every metadata field from one fetched page.
/// Fields missing from all sources stay `None`; that is data, not an error.
pub fn extract_metadata(html: &str, item_id: u64, response_url: &str) -> ItemMetadata {
    let document = Html::parse_document(html);
    let json_ld = parse_json_ld(&document);
    let og = parse_og_tags(&document);

    let mut metadata = ItemMetadata::new(item_id);
    metadata.name = pick_name(&document, &og, json_ld.as_ref());
    metadata.shop_name = pick_shop_name(&document, &og);
    metadata.creator_id = pick_creator_id(&document, response_url);
    metadata.current_price = pick_price(&document, &og, json_ld.as_ref());
    metadata.image_url = pick_image(&document, &og, response_url);
    metadata.description_excerpt = pick_description(&document, &og);
    metadata.files = pick_files(&document);
    metadata.related_item_ids = pick_related_item_ids(&document);
    metadata.page_updated_at = json_ld.as_ref().and_then(|value| {
        value
            .get("dateModified")
            .or_else(|| value.get("datePublished"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    });
    metadata
}

fn parse_json_ld(document: &Html) -> Option<Value> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    for element in document.select(&selector) {
        let raw: String = element.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if value.is_object() && value.get("@type").is_some() {
            return Some(value);
        }
        if let Some(first) = value.as_array().and_then(|entries| entries.first())
            && first.is_object()
        {
            return Some(first.clone());
        }
    }
    None
}

fn parse_og_tags(document: &Html) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    if let Ok(selector) = Selector::parse(r#"meta[property^="og:"]"#) {
        for element in document.select(&selector) {
            if let (Some(property), Some(content)) = (
                element.value().attr("property"),
                element.value().attr("content"),
            ) && let Some(key) = property.strip_prefix("og:")
                && !key.is_empty()
                && !content.trim().is_empty()
            {
                tags.entry(key.to_string())
                    .or_insert_with(|| content.trim().to_string());
            }
        }
    }
    tags
}

fn pick_name(
    document: &Html,
    og: &HashMap<String, String>,
    json_ld: Option<&Value>,
) -> Option<String> {
    if let Some(name) = json_ld
        .and_then(|value| value.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return Some(name.to_string());
    }
    if let Some(title) = og.get("title") {
        return Some(title.clone());
    }
    first_text(document, NAME_SELECTORS)
}

fn pick_shop_name(document: &Html, og: &HashMap<String, String>) -> Option<String> {
    first_text(document, SHOP_SELECTORS).or_else(|| og.get("site_name").cloned())
}

fn pick_creator_id(document: &Html, response_url: &str) -> Option<String> {
    for selector_str in SHOP_LINK_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let href = element.value().attr("href").unwrap_or("");
        if let Some(captures) = subdomain_re().captures(href) {
            return Some(captures[1].to_string());
        }
        if let Some(captures) = shop_path_re().captures(href) {
            return Some(captures[1].to_string());
        }
    }

    // Fall back to the subdomain the response was served from.
    let host = Url::parse(response_url).ok()?.host_str()?.to_string();
    let subdomain = host.strip_suffix(".booth.pm")?;
    if subdomain.is_empty() || subdomain == "booth" || subdomain.contains('.') {
        return None;
    }
    Some(subdomain.to_string())
}

fn pick_price(
    document: &Html,
    og: &HashMap<String, String>,
    json_ld: Option<&Value>,
) -> Option<u64> {
    if let Some(price) = json_ld.and_then(json_ld_price) {
        return Some(price);
    }

    if let Some(raw) = og.get("price:amount")
        && let Some(captures) = digits_re().find(raw)
    {
        if let Ok(value) = captures.as_str().replace(',', "").parse::<u64>() {
            if value > 0 {
                return Some(value);
            }
            if free_re().is_match(raw) {
                return Some(0);
            }
        }
    }

    for selector_str in PRICE_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let text = element_text(element);
        if let Some(price) = price_from_text(&text) {
            return Some(price);
        }
    }

    // Last numeric chance: short elements carrying a yen amount anywhere.
    if let Ok(selector) = Selector::parse("div, span") {
        for element in document.select(&selector) {
            let text = element_text(element);
            if !text.contains('¥') || text.chars().count() > 50 {
                continue;
            }
            if let Some(price) = price_from_text(&text) {
                return Some(price);
            }
        }
    }

    // Zero only when the page says so explicitly; a price is never guessed.
    for selector_str in FREE_TEXT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next()
            && free_re().is_match(&visible_text(element))
        {
            return Some(0);
        }
    }
    None
}

fn json_ld_price(value: &Value) -> Option<u64> {
    let offers = value.get("offers")?;
    if offers.is_object() {
        return parse_price_value(offers.get("price"))
            .or_else(|| parse_price_value(offers.get("lowPrice")));
    }
    offers
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|offer| parse_price_value(offer.get("price")))
}

fn parse_price_value(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|float| float as u64)),
        Value::String(raw) => raw.replace(',', "").trim().parse::<f64>().ok().map(|v| v as u64),
        _ => None,
    }
}

fn price_from_text(text: &str) -> Option<u64> {
    if let Some(captures) = yen_re().captures(text) {
        let value = captures[1].replace(',', "").parse::<u64>().ok()?;
        if value > 0 {
            return Some(value);
        }
        if free_re().is_match(text) {
            return Some(0);
        }
        return None;
    }
    let value = digits_re()
        .find(text)?
        .as_str()
        .replace(',', "")
        .parse::<u64>()
        .ok()?;
    (value > 0).then_some(value)
}

/// Image selection keeps whatever rendition the page advertises. A
/// `/c/{W}x{H}/` resize segment is left in place; recovering the original
/// resolution is out of scope here.
fn pick_image(document: &Html, og: &HashMap<String, String>, response_url: &str) -> Option<String> {
    if let Some(image) = og.get("image") {
        return absolutize(response_url, image);
    }

    let mut best: Option<(i64, String)> = None;
    for (index, selector_str) in IMAGE_SELECTORS.iter().enumerate() {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let src = element
            .value()
            .attr("data-original")
            .or_else(|| element.value().attr("src"))
            .or_else(|| element.value().attr("data-src"))
            .or_else(|| element.value().attr("data-lazy-src"));
        let Some(src) = src else {
            continue;
        };
        let Some(url) = absolutize(response_url, src) else {
            continue;
        };
        let score = image_quality_score(&url, element) + ((IMAGE_SELECTORS.len() - index) as i64 * 10);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, url));
        }
    }
    best.map(|(_, url)| url)
}

fn image_quality_score(url: &str, element: ElementRef<'_>) -> i64 {
    let mut score = 0i64;
    let lowered = url.to_lowercase();
    if let Some(captures) = size_re().captures(url)
        && let Ok(width) = captures[1].parse::<i64>()
    {
        score += (width / 100).min(10);
    }
    if lowered.contains("original") {
        score += 15;
    } else if lowered.contains("large") {
        score += 10;
    } else if lowered.contains("medium") {
        score += 5;
    }
    if lowered.ends_with(".png") {
        score += 5;
    } else if lowered.ends_with(".webp") {
        score += 4;
    } else if lowered.ends_with(".jpg") || lowered.ends_with(".jpeg") {
        score += 3;
    }
    for attr in ["width", "height"] {
        if let Some(value) = element.value().attr(attr)
            && let Ok(parsed) = value.parse::<i64>()
        {
            score += (parsed / 100).min(5);
        }
    }
    score
}

fn pick_description(document: &Html, og: &HashMap<String, String>) -> Option<String> {
    if let Some(description) = og.get("description") {
        return Some(excerpt(description));
    }
    for selector_str in DESCRIPTION_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = visible_text(element);
            if !text.trim().is_empty() {
                return Some(excerpt(&text));
            }
        }
    }
    None
}

fn excerpt(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > DESCRIPTION_EXCERPT_CHARS {
        let truncated: String = collapsed.chars().take(DESCRIPTION_EXCERPT_CHARS).collect();
        format!("{truncated}...")
    } else {
        collapsed
    }
}

fn pick_files(document: &Html) -> Vec<String> {
    let mut files = Vec::new();
    for selector_str in FILE_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let filename = element_text(element);
            if !filename.is_empty() && !files.contains(&filename) {
                files.push(filename);
            }
        }
    }
    files
}

fn pick_related_item_ids(document: &Html) -> Vec<u64> {
    let mut related = Vec::new();
    let anchor = match Selector::parse("a") {
        Ok(selector) => selector,
        Err(_) => return related,
    };
    for selector_str in RELATED_CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let mut haystack = visible_text(element);
        for link in element.select(&anchor) {
            if let Some(href) = link.value().attr("href") {
                haystack.push(' ');
                haystack.push_str(href);
            }
        }
        for captures in item_ref_re().captures_iter(&haystack) {
            if let Ok(item_id) = captures[1].parse::<u64>()
                && is_valid_item_id(item_id)
                && !related.contains(&item_id)
            {
                related.push(item_id);
            }
        }
    }
    related
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element_text(element);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Text content with script/style subtrees skipped.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_visible(element, &mut out);
    out
}

fn collect_visible(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(inner) if matches!(inner.name(), "script" | "style") => {}
            Node::Element(_) => {
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_visible(child_ref, out);
                }
            }
            _ => {}
        }
    }
}

fn absolutize(base: &str, candidate: &str) -> Option<String> {
    if let Ok(base_url) = Url::parse(base) {
        return base_url.join(candidate).ok().map(|url| url.to_string());
    }
    candidate.starts_with("http").then(|| candidate.to_string())
}

fn item_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"items/(\d+)").expect("static pattern"))
}

fn yen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"¥\s*([\d,]+)").expect("static pattern"))
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\d,]+").expect("static pattern"))
}

fn free_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)無料|free|フリー|0円").expect("static pattern"))
}

fn subdomain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https://([^.]+)\.booth\.pm").expect("static pattern"))
}

fn shop_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/shop/([^/?]+)").expect("static pattern"))
}

fn size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{3,4})x(\d{3,4})").expect("static pattern"))
}
