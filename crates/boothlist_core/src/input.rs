use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::model::{RawItem, is_valid_item_id, item_page_url};

/// Ordered from most to least specific; the first capture wins. The last
/// pattern picks up bare 7-8 digit ids pasted without a URL.
const ID_PATTERNS: &[&str] = &[
    r"(?i)https?://booth\.pm/(?:ja/|en/)?items/(\d+)",
    r"(?i)https?://[\w-]+\.booth\.pm/items/(\d+)",
    r"(?i)booth\.pm/(?:ja/|en/)?items/(\d+)",
    r"(?i)items/(\d+)(?:[/?#]|$)",
    r"(?i)booth\.pm/items/(\d+)",
    r"(?i)booth\.pm/(\d+)",
    r"(?i)/items/(\d+)",
    r"(?i)item[_-]?id[=:](\d+)",
    r"(?i)(?:item|product)[_-]?(\d+)",
    r"(\d{7,8})(?:[^\d]|$)",
];

fn id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ID_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("static pattern"))
            .collect()
    })
}

/// Pull a BOOTH item id out of a URL or free-form text. Range checking
/// happens later in [`validate`]; this only finds digits in a recognized
/// shape.
pub fn extract_item_id(text: &str) -> Option<u64> {
    for regex in id_patterns() {
        if let Some(captures) = regex.captures(text)
            && let Ok(item_id) = captures[1].parse::<u64>()
        {
            return Some(item_id);
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct PurchaseFile {
    #[serde(default)]
    booth_purchases: Vec<PurchaseRecord>,
}

#[derive(Debug, Deserialize)]
struct PurchaseRecord {
    id: Option<u64>,
    name: Option<String>,
    author: Option<String>,
    category: Option<String>,
    variation: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    notes: Option<String>,
    wish_price: Option<u64>,
}

/// `booth_purchases:` list, the richest input format.
pub fn load_yaml(path: &Path) -> Result<Vec<RawItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let parsed: PurchaseFile = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;

    let mut items = Vec::new();
    for record in parsed.booth_purchases {
        let Some(item_id) = record.id else {
            tracing::warn!(name = record.name.as_deref().unwrap_or(""), "skipping entry without id");
            continue;
        };
        items.push(RawItem {
            item_id,
            name: record.name,
            author: record.author,
            category: record.category,
            variation: record.variation,
            files: record.files,
            url: Some(item_page_url(item_id)),
            notes: record.notes,
            wish_price: record.wish_price,
        });
    }
    tracing::info!(count = items.len(), path = %path.display(), "loaded yaml input");
    Ok(items)
}

/// CSV rows with loosely-named columns; the id may live in an `id` column
/// or be embedded in a `url`/`link` column.
pub fn load_csv(path: &Path) -> Result<Vec<RawItem>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let column = |record: &csv::StringRecord, names: &[&str]| -> Option<String> {
        for name in names {
            if let Some(index) = headers.iter().position(|header| header.eq_ignore_ascii_case(name))
                && let Some(value) = record.get(index)
                && !value.trim().is_empty()
            {
                return Some(value.trim().to_string());
            }
        }
        None
    };

    let mut items = Vec::new();
    for record in reader.records() {
        let record = record?;
        let item_id = ["id", "item_id", "url", "link"]
            .iter()
            .find_map(|name| column(&record, &[name]).and_then(|value| extract_item_id(&value)));
        let Some(item_id) = item_id else {
            tracing::warn!("skipping csv row without a usable item id");
            continue;
        };
        items.push(RawItem {
            item_id,
            name: column(&record, &["name", "title"]),
            author: column(&record, &["author", "creator", "shop"]),
            category: column(&record, &["category", "type"]),
            variation: column(&record, &["variation", "variant"]),
            files: Vec::new(),
            url: Some(item_page_url(item_id)),
            notes: column(&record, &["notes", "memo"]),
            wish_price: column(&record, &["price", "wish_price"]).and_then(|raw| parse_price(&raw)),
        });
    }
    tracing::info!(count = items.len(), path = %path.display(), "loaded csv input");
    Ok(items)
}

/// Markdown or plain text: one URL or id per line. A markdown link title
/// becomes the item name.
pub fn load_lines(path: &Path) -> Result<Vec<RawItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut items = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(item_id) = extract_item_id(line) else {
            continue;
        };
        if !seen.insert(item_id) {
            continue;
        }
        let name = md_link_re()
            .captures(line)
            .map(|captures| captures[1].to_string());
        let mut item = RawItem::new(item_id);
        item.name = name;
        items.push(item);
    }
    tracing::info!(count = items.len(), path = %path.display(), "loaded line input");
    Ok(items)
}

/// Scan a directory (non-recursively) for every supported input file.
/// A single unreadable file is logged and skipped, not fatal. Duplicate
/// ids keep their first occurrence.
pub fn load_directory(input_dir: &Path) -> Result<Vec<RawItem>> {
    if !input_dir.is_dir() {
        tracing::warn!(path = %input_dir.display(), "input directory not found");
        return Ok(Vec::new());
    }

    let mut all = Vec::new();
    for entry in WalkDir::new(input_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        let path = entry.path();
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let loaded = match extension.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => load_yaml(path),
            "csv" => load_csv(path),
            "md" | "txt" => load_lines(path),
            _ => continue,
        };
        match loaded {
            Ok(items) => all.extend(items),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to load input file");
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for item in all {
        if seen.insert(item.item_id) {
            unique.push(item);
        } else {
            tracing::debug!(item_id = item.item_id, "duplicate id skipped");
        }
    }
    tracing::info!(count = unique.len(), path = %input_dir.display(), "loaded input directory");
    Ok(unique)
}

/// Drop out-of-range ids, logging a bounded error summary. Items without a
/// URL get the canonical one filled in.
pub fn validate(items: Vec<RawItem>) -> Vec<RawItem> {
    let mut valid = Vec::new();
    let mut errors = Vec::new();
    for mut item in items {
        if !is_valid_item_id(item.item_id) {
            errors.push(format!("item id {} outside valid range", item.item_id));
            continue;
        }
        if item.url.is_none() {
            item.url = Some(item_page_url(item.item_id));
        }
        valid.push(item);
    }
    if !errors.is_empty() {
        tracing::warn!(count = errors.len(), "validation errors");
        for error in errors.iter().take(5) {
            tracing::warn!("  {error}");
        }
        if errors.len() > 5 {
            tracing::warn!("  ... and {} more", errors.len() - 5);
        }
    }
    tracing::info!(valid = valid.len(), "validated input items");
    valid
}

/// Yen amounts with currency symbols and separators stripped.
pub fn parse_price(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !matches!(ch, '¥' | ',' | '円') && !ch.is_whitespace())
        .collect();
    cleaned.parse().ok()
}

fn md_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("static pattern"))
}

/// One row of the browser-history scan, richest-first ordering preserved
/// from the query (most recent visit first).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub item_id: u64,
    pub title: String,
    pub url: String,
    pub visit_count: u64,
    pub last_visit: String,
}

/// Reads BOOTH item visits out of a Chrome `History` SQLite database. The
/// live database is locked while Chrome runs, so it is copied to a temp
/// file first.
pub struct ChromeHistory {
    history_path: PathBuf,
}

impl ChromeHistory {
    pub fn new(history_path: Option<PathBuf>) -> Result<Self> {
        let history_path = match history_path {
            Some(path) => path,
            None => Self::default_history_path()?,
        };
        if !history_path.is_file() {
            bail!("chrome history not found at {}", history_path.display());
        }
        Ok(Self { history_path })
    }

    pub fn default_history_path() -> Result<PathBuf> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .context("cannot locate the home directory")?;
        let base = match std::env::consts::OS {
            "windows" => home.join("AppData/Local/Google/Chrome/User Data/Default"),
            "macos" => home.join("Library/Application Support/Google/Chrome/Default"),
            _ => home.join(".config/google-chrome/Default"),
        };
        Ok(base.join("History"))
    }

    /// Distinct BOOTH item URLs visited within the last `days_back` days,
    /// newest first, one entry per item id.
    pub fn extract_ids(&self, days_back: i64) -> Result<Vec<HistoryEntry>> {
        let temp = tempfile::NamedTempFile::new().context("creating temp copy of history db")?;
        std::fs::copy(&self.history_path, temp.path()).with_context(|| {
            format!("copying {} (is Chrome running?)", self.history_path.display())
        })?;

        let connection = rusqlite::Connection::open_with_flags(
            temp.path(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .context("opening history database")?;

        // Chrome stores timestamps as microseconds since the Windows epoch.
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days_back);
        let webkit_cutoff = (cutoff.timestamp() + 11_644_473_600) * 1_000_000;

        let mut statement = connection.prepare(
            "SELECT DISTINCT
                urls.url,
                urls.title,
                urls.visit_count,
                datetime(urls.last_visit_time / 1000000 - 11644473600, 'unixepoch') AS last_visit
             FROM urls
             WHERE urls.url LIKE '%booth.pm%'
               AND urls.url LIKE '%/items/%'
               AND urls.last_visit_time > ?1
             ORDER BY urls.last_visit_time DESC",
        )?;
        let rows = statement.query_map(rusqlite::params![webkit_cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            let (url, title, visit_count, last_visit) = row?;
            let Some(item_id) = extract_item_id(&url).filter(|id| is_valid_item_id(*id)) else {
                continue;
            };
            if !seen.insert(item_id) {
                continue;
            }
            entries.push(HistoryEntry {
                item_id,
                title: title.unwrap_or_else(|| format!("Item {item_id}")),
                url: item_page_url(item_id),
                visit_count: u64::try_from(visit_count).unwrap_or(0),
                last_visit: last_visit.unwrap_or_default(),
            });
        }
        tracing::info!(count = entries.len(), days_back, "scanned chrome history");
        Ok(entries)
    }

    /// Write a BoothList-compatible worklist CSV under the input directory.
    pub fn write_input_csv(entries: &[HistoryEntry], output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(output_path)
            .with_context(|| format!("writing {}", output_path.display()))?;
        writer.write_record(["item_id", "name", "url"])?;
        for entry in entries {
            writer.write_record([
                entry.item_id.to_string().as_str(),
                entry.title.as_str(),
                entry.url.as_str(),
            ])?;
        }
        writer.flush()?;
        tracing::info!(count = entries.len(), path = %output_path.display(), "wrote worklist csv");
        Ok(())
    }
}
