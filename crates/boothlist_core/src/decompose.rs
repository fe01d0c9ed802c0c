use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::avatar::{AvatarDictionary, AvatarEntry};
use crate::fetch::FetchContext;
use crate::model::Variant;

pub const MAX_DEPTH: usize = 2;
/// Fixed heuristic weights. Acceptance is a threshold test on the maximum
/// observed confidence per avatar, not a probabilistic combination.
pub const CONFIDENCE_FILENAME: f64 = 0.90;
pub const CONFIDENCE_EXPLICIT_TEXT: f64 = 0.95;
pub const CONFIDENCE_CONTEXTUAL_TEXT: f64 = 0.80;
pub const ACCEPT_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Filename,
    ExplicitText,
    ContextualText,
}

impl CandidateSource {
    pub fn confidence(self) -> f64 {
        match self {
            Self::Filename => CONFIDENCE_FILENAME,
            Self::ExplicitText => CONFIDENCE_EXPLICIT_TEXT,
            Self::ContextualText => CONFIDENCE_CONTEXTUAL_TEXT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::ExplicitText => "explicit_text",
            Self::ContextualText => "contextual_text",
        }
    }
}

/// Transient scoring record; lives only until the per-avatar merge.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub avatar_code: String,
    pub source: CandidateSource,
    pub confidence: f64,
    /// Filename-derived variant label, when the signal carries one.
    pub label: Option<String>,
}

impl Candidate {
    fn new(avatar_code: &str, source: CandidateSource) -> Self {
        Self {
            avatar_code: avatar_code.to_string(),
            source,
            confidence: source.confidence(),
            label: None,
        }
    }
}

/// Recursive, cycle-safe set decomposition. Holds the fetch context and the
/// avatar dictionary; the visited set is owned by the caller and shared
/// across the whole traversal.
pub struct DecomposeEngine<'a> {
    fetch: &'a mut FetchContext,
    dictionary: &'a AvatarDictionary,
    max_depth: usize,
}

impl<'a> DecomposeEngine<'a> {
    pub fn new(fetch: &'a mut FetchContext, dictionary: &'a AvatarDictionary) -> Self {
        Self {
            fetch,
            dictionary,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Decompose one item into avatar variants. Guard exits (depth, cycle)
    /// return empty and are expected boundary behavior, not failures; the
    /// only propagated error is an unwritable cache.
    pub fn decompose(
        &mut self,
        item_id: u64,
        hint_files: &[String],
        visited: &mut HashSet<u64>,
        depth: usize,
    ) -> Result<Vec<Variant>> {
        if depth > self.max_depth {
            tracing::debug!(item_id, depth, "depth limit reached");
            return Ok(Vec::new());
        }
        if !visited.insert(item_id) {
            tracing::debug!(item_id, "already visited, skipping");
            return Ok(Vec::new());
        }

        let metadata = self.fetch.resolve(item_id)?;
        let fetch_failed = metadata.error.is_some();
        if fetch_failed {
            tracing::debug!(item_id, error = ?metadata.error, "no page data for decomposition");
        }

        // Worklist hints are usable even when the fetch produced nothing.
        let mut files: Vec<String> = hint_files.to_vec();
        for file in &metadata.files {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }

        let item_name = metadata.name.clone();
        let text = format!(
            "{} {}",
            item_name.as_deref().unwrap_or(""),
            metadata.description_excerpt.as_deref().unwrap_or("")
        );

        let mut candidates = filename_candidates(&files, self.dictionary);
        candidates.extend(explicit_text_candidates(&text, self.dictionary));
        candidates.extend(contextual_candidates(&text, self.dictionary));

        if !fetch_failed {
            for related_id in &metadata.related_item_ids {
                if visited.contains(related_id) || depth + 1 > self.max_depth {
                    continue;
                }
                // Related items contribute avatar signal only; their own
                // sub-identifiers and file lists are never reused here.
                let child_variants = self.decompose(*related_id, &[], visited, depth + 1)?;
                for variant in child_variants {
                    for target in variant.targets {
                        candidates.push(Candidate::new(
                            &target.code,
                            CandidateSource::ContextualText,
                        ));
                    }
                }
            }
        }

        let merged = merge_candidates(candidates);
        let mut variants = Vec::new();
        for (code, best) in merged {
            let Some(avatar) = self.dictionary.by_code(&code) else {
                continue;
            };
            let variant_files = files_for_avatar(&files, &code);
            let variant_name = match &item_name {
                Some(name) => format!("{name} for {}", avatar.name),
                None => best
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("Item {item_id} for {}", avatar.name)),
            };
            let subitem_id = variant_id(item_id, &code, &variant_name);
            variants.push(Variant {
                subitem_id,
                parent_item_id: item_id,
                variant_name,
                targets: vec![avatar],
                files: variant_files,
                notes: Some(format!(
                    "matched via {} ({:.2})",
                    best.source.as_str(),
                    best.confidence
                )),
            });
        }
        if !variants.is_empty() {
            tracing::debug!(item_id, count = variants.len(), "emitted variants");
        }
        Ok(variants)
    }
}

/// Filenames beginning or ending with a known alias token (0.90).
pub fn filename_candidates(files: &[String], dictionary: &AvatarDictionary) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for file in files {
        let lowered = file.to_lowercase();
        for entry in dictionary.entries() {
            let matched = dictionary.alias_tokens(entry).iter().any(|token| {
                lowered.starts_with(&format!("{token}_")) || lowered.contains(&format!("_{token}"))
            });
            if matched {
                let mut candidate = Candidate::new(entry.code, CandidateSource::Filename);
                candidate.label = Some(file_label(file, entry));
                candidates.push(candidate);
            }
        }
    }
    candidates
}

/// Labeled enumerations such as `対応アバター: A、B` (0.95).
pub fn explicit_text_candidates(text: &str, dictionary: &AvatarDictionary) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for re in [explicit_ja_re(), explicit_en_re()] {
        for captures in re.captures_iter(text) {
            let segment = &captures[1];
            for entry in dictionary.entries() {
                if segment_mentions(segment, entry, dictionary) {
                    candidates.push(Candidate::new(entry.code, CandidateSource::ExplicitText));
                }
            }
        }
    }
    candidates
}

/// `for X` / `X用` / `X対応` phrasing near an alias (0.80).
pub fn contextual_candidates(text: &str, dictionary: &AvatarDictionary) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for re in [for_phrase_re(), suffix_phrase_re()] {
        for captures in re.captures_iter(text) {
            if let Some(avatar) = dictionary.resolve(&captures[1]) {
                candidates.push(Candidate::new(&avatar.code, CandidateSource::ContextualText));
            }
        }
    }
    candidates
}

/// Threshold filter plus per-avatar dedup. The strongest signal decides;
/// the boundary is inclusive. Output is ordered by avatar code so variant
/// emission is deterministic.
pub fn merge_candidates(candidates: Vec<Candidate>) -> Vec<(String, Candidate)> {
    let mut merged: BTreeMap<String, Candidate> = BTreeMap::new();
    for mut candidate in candidates {
        if candidate.confidence < ACCEPT_THRESHOLD {
            continue;
        }
        match merged.entry(candidate.avatar_code.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if candidate.confidence > existing.confidence {
                    // The stronger signal wins; a label survives either way.
                    if candidate.label.is_none() {
                        candidate.label = existing.label.take();
                    }
                    *existing = candidate;
                } else if existing.label.is_none() && candidate.label.is_some() {
                    existing.label = candidate.label;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }
    merged.into_iter().collect()
}

/// Files that belong to one avatar by filename prefix/suffix convention.
pub fn files_for_avatar(files: &[String], code: &str) -> Vec<String> {
    let lowered_code = code.to_lowercase();
    files
        .iter()
        .filter(|file| {
            let lowered = file.to_lowercase();
            lowered.starts_with(&format!("{lowered_code}_"))
                || lowered.contains(&format!("_{lowered_code}"))
        })
        .cloned()
        .collect()
}

/// URL-safe slug: unicode alphanumerics kept, separator runs collapsed to
/// single hyphens, capped at 50 chars.
pub fn slug(text: &str) -> String {
    let mut out = String::new();
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || matches!(ch, '_' | '-') {
            pending_hyphen = true;
        }
        if out.chars().count() >= 50 {
            break;
        }
    }
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// Contractual virtual identifier: downstream consumers parse on the
/// literal `#variant:` and `:` delimiters.
pub fn variant_id(parent_item_id: u64, avatar_code: &str, variant_name: &str) -> String {
    format!("{parent_item_id}#variant:{avatar_code}:{}", slug(variant_name))
}

/// Human-readable label recovered from a matched filename: extension,
/// avatar token and trailing version markers stripped.
fn file_label(filename: &str, entry: &AvatarEntry) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let label = strip_avatar_token(stem, &entry.code).unwrap_or_else(|| stem.to_string());
    let label = version_suffix_re().replace(&label, "").to_string();
    let label = label.replace('_', " ").trim().to_string();
    if label.is_empty() {
        entry.code.to_string()
    } else {
        label
    }
}

/// Removes a leading `{code}_` or embedded `_{code}` from a filename stem.
/// Matching works per char so case folds that change byte length (such as
/// `ẞ` to `ß`) cannot produce an out-of-boundary slice.
fn strip_avatar_token(stem: &str, code: &str) -> Option<String> {
    fn folds_to(a: char, b: char) -> bool {
        a == b || a.to_lowercase().eq(b.to_lowercase())
    }

    let chars: Vec<char> = stem.chars().collect();
    let token: Vec<char> = code.to_lowercase().chars().collect();
    let window = token.len() + 1;
    if chars.len() < window {
        return None;
    }
    if chars[token.len()] == '_'
        && chars.iter().zip(&token).all(|(a, b)| folds_to(*a, *b))
    {
        return Some(chars[window..].iter().collect());
    }
    for start in 0..=chars.len() - window {
        if chars[start] == '_'
            && chars[start + 1..start + window]
                .iter()
                .zip(&token)
                .all(|(a, b)| folds_to(*a, *b))
        {
            let mut out: String = chars[..start].iter().collect();
            out.extend(&chars[start + window..]);
            return Some(out);
        }
    }
    None
}

fn segment_mentions(segment: &str, entry: &AvatarEntry, dictionary: &AvatarDictionary) -> bool {
    let lowered = segment.to_lowercase();
    dictionary
        .alias_tokens(entry)
        .iter()
        .any(|token| lowered.contains(token))
}

fn explicit_ja_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"対応(?:アバター)?\s*[：:]\s*([^。\n]+)").expect("static pattern"))
}

fn explicit_en_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)compatible\s+with[：:]?\s*([^.\n]+)").expect("static pattern"))
}

fn for_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bfor\s+([A-Za-z][A-Za-z0-9]*)").expect("static pattern"))
}

fn suffix_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9ぁ-んァ-ヶ一-龠ー]+)(?:用|対応)").expect("static pattern")
    })
}

fn version_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[_\-\s]*v(?:er)?\.?\d+(?:\.\d+)*$").expect("static pattern")
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::{
        ACCEPT_THRESHOLD, Candidate, CandidateSource, DecomposeEngine, explicit_text_candidates,
        filename_candidates, merge_candidates, slug, variant_id,
    };
    use crate::avatar::AvatarDictionary;
    use crate::cache::MetadataCache;
    use crate::fetch::testing::ScriptedTransport;
    use crate::fetch::{FetchContext, FetchOptions};
    use crate::model::item_page_url;

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

    fn description_page(body: &str) -> String {
        format!(r#"<html><body><div class="item-description">{body}</div></body></html>"#)
    }

    #[test]
    fn slug_collapses_separators_and_lowercases() {
        assert_eq!(slug("Marshmallow Full Set"), "marshmallow-full-set");
        assert_eq!(slug("Set"), "set");
        assert_eq!(slug("__  --"), "unknown");
        assert_eq!(slug("かなえ用 ワンピース"), "かなえ用-ワンピース");
    }

    #[test]
    fn variant_id_uses_the_contractual_delimiters() {
        assert_eq!(
            variant_id(1_000_000, "Kikyo", "Set"),
            "1000000#variant:Kikyo:set"
        );
    }

    #[test]
    fn filename_prefix_and_suffix_both_match() {
        let dictionary = AvatarDictionary::new();
        let files = vec![
            "Kikyo_Dress_v2.zip".to_string(),
            "Onepiece_Selestia.zip".to_string(),
            "readme.txt".to_string(),
        ];
        let candidates = filename_candidates(&files, &dictionary);
        let codes: Vec<&str> = candidates.iter().map(|c| c.avatar_code.as_str()).collect();
        assert_eq!(codes, vec!["Kikyo", "Selestia"]);
        assert!(candidates.iter().all(|c| c.source == CandidateSource::Filename));
        assert_eq!(candidates[0].label.as_deref(), Some("Dress"));
        assert_eq!(candidates[1].label.as_deref(), Some("Onepiece"));
    }

    #[test]
    fn filename_label_survives_multibyte_case_folds() {
        // "ẞ" lowercases to the shorter "ß"; byte offsets from the lowered
        // copy must not be applied to the original stem.
        let dictionary = AvatarDictionary::new();
        let files = vec!["ẞ_Kikyo.zip".to_string()];
        let candidates = filename_candidates(&files, &dictionary);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].avatar_code, "Kikyo");
        assert_eq!(candidates[0].label.as_deref(), Some("ẞ"));
    }

    #[test]
    fn explicit_enumeration_finds_every_listed_avatar() {
        let dictionary = AvatarDictionary::new();
        let candidates = explicit_text_candidates("対応アバター: 桔梗、かなえ", &dictionary);
        let mut codes: Vec<&str> = candidates.iter().map(|c| c.avatar_code.as_str()).collect();
        codes.sort_unstable();
        assert_eq!(codes, vec!["Kanae", "Kikyo"]);
        assert!(candidates.iter().all(|c| c.confidence == 0.95));

        let english = explicit_text_candidates("Compatible with: Manuka, Rurune", &dictionary);
        assert_eq!(english.len(), 2);
    }

    #[test]
    fn threshold_is_inclusive_at_exactly_0_75() {
        let at_threshold = Candidate {
            avatar_code: "Kikyo".to_string(),
            source: CandidateSource::ContextualText,
            confidence: ACCEPT_THRESHOLD,
            label: None,
        };
        let below = Candidate {
            avatar_code: "Kanae".to_string(),
            source: CandidateSource::ContextualText,
            confidence: ACCEPT_THRESHOLD - 0.001,
            label: None,
        };
        let merged = merge_candidates(vec![at_threshold, below]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].0, "Kikyo");
    }

    #[test]
    fn merge_keeps_the_strongest_signal_per_avatar() {
        let filename = Candidate::new("Kikyo", CandidateSource::Filename);
        let explicit = Candidate::new("Kikyo", CandidateSource::ExplicitText);
        let merged = merge_candidates(vec![filename, explicit]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1.source, CandidateSource::ExplicitText);
    }

    #[test]
    fn filename_scenario_emits_stable_variant_ids() {
        let (transport, script) = ScriptedTransport::new();
        script
            .borrow_mut()
            .insert_page(&item_page_url(1_000_000), "<html></html>");
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let hints = vec!["Kikyo_Set_v1.zip".to_string(), "Selestia_Set_v1.zip".to_string()];
        let mut visited = HashSet::new();
        let variants = engine.decompose(1_000_000, &hints, &mut visited, 0).expect("decompose");

        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].subitem_id, "1000000#variant:Kikyo:set");
        assert_eq!(variants[1].subitem_id, "1000000#variant:Selestia:set");
        assert_eq!(variants[0].targets.len(), 1);
        assert_eq!(variants[0].targets[0].code, "Kikyo");
        assert_eq!(variants[0].files, vec!["Kikyo_Set_v1.zip".to_string()]);
        assert!(variants[0].notes.as_deref().expect("notes").contains("filename"));
    }

    #[test]
    fn explicit_text_scenario_uses_the_enumeration_source() {
        let (transport, script) = ScriptedTransport::new();
        script.borrow_mut().insert_page(
            &item_page_url(1_000_001),
            &description_page("対応アバター: 桔梗、かなえ"),
        );
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let mut visited = HashSet::new();
        let variants = engine
            .decompose(1_000_001, &[], &mut visited, 0)
            .expect("decompose");

        assert_eq!(variants.len(), 2);
        let codes: Vec<&str> = variants
            .iter()
            .map(|variant| variant.targets[0].code.as_str())
            .collect();
        assert_eq!(codes, vec!["Kanae", "Kikyo"]);
        for variant in &variants {
            assert!(variant.notes.as_deref().expect("notes").contains("explicit_text (0.95)"));
        }
    }

    #[test]
    fn cyclic_references_terminate_and_visit_each_item_once() {
        let (transport, script) = ScriptedTransport::new();
        {
            let mut script = script.borrow_mut();
            script.insert_page(
                &item_page_url(1_000_002),
                &description_page("see items/1000003"),
            );
            script.insert_page(
                &item_page_url(1_000_003),
                &description_page("see items/1000002"),
            );
        }
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let mut visited = HashSet::new();
        engine
            .decompose(1_000_002, &[], &mut visited, 0)
            .expect("decompose");

        assert_eq!(visited.len(), 2);
        assert_eq!(script.borrow().requested.len(), 2);
    }

    #[test]
    fn hops_beyond_the_depth_bound_contribute_nothing() {
        let (transport, script) = ScriptedTransport::new();
        {
            let mut script = script.borrow_mut();
            script.insert_page(&item_page_url(1_000_010), &description_page("items/1000011"));
            script.insert_page(&item_page_url(1_000_011), &description_page("items/1000012"));
            script.insert_page(&item_page_url(1_000_012), &description_page("items/1000013"));
            // Hop 3 carries strong avatar signal; it must never be reached.
            script.insert_page(
                &item_page_url(1_000_013),
                &description_page("対応アバター: 桔梗、かなえ、マヌカ"),
            );
            script.insert_page(&item_page_url(1_000_014), &description_page("unused"));
        }
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let mut visited = HashSet::new();
        let variants = engine
            .decompose(1_000_010, &[], &mut visited, 0)
            .expect("decompose");

        assert!(variants.is_empty());
        assert_eq!(script.borrow().requested.len(), 3);
        assert!(!visited.contains(&1_000_013));
    }

    #[test]
    fn related_items_contribute_avatar_signal_to_the_parent() {
        let (transport, script) = ScriptedTransport::new();
        {
            let mut script = script.borrow_mut();
            script.insert_page(
                &item_page_url(1_000_020),
                r#"<html><head><meta property="og:title" content="Bundle"></head>
                   <body><div class="item-description">items/1000021</div></body></html>"#,
            );
            script.insert_page(
                &item_page_url(1_000_021),
                &description_page("対応アバター: しなの"),
            );
        }
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let mut visited = HashSet::new();
        let variants = engine
            .decompose(1_000_020, &[], &mut visited, 0)
            .expect("decompose");

        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].targets[0].code, "Shinano");
        assert_eq!(variants[0].parent_item_id, 1_000_020);
        assert_eq!(variants[0].variant_name, "Bundle for しなの");
        // Child files are never inherited by the parent variant.
        assert!(variants[0].files.is_empty());
    }

    #[test]
    fn child_fetch_failures_are_swallowed() {
        let (transport, script) = ScriptedTransport::new();
        {
            let mut script = script.borrow_mut();
            script.insert_page(
                &item_page_url(1_000_030),
                &description_page("対応アバター: 薄荷 items/1000031"),
            );
            // 1000031 has no scripted page; the transport errors for it.
        }
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let mut visited = HashSet::new();
        let variants = engine
            .decompose(1_000_030, &[], &mut visited, 0)
            .expect("decompose");

        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].targets[0].code, "Hakka");
    }

    #[test]
    fn two_sources_for_one_avatar_yield_one_variant() {
        let (transport, script) = ScriptedTransport::new();
        script.borrow_mut().insert_page(
            &item_page_url(1_000_040),
            &description_page("対応アバター: 桔梗"),
        );
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();
        let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);

        let hints = vec!["Kikyo_Dress.zip".to_string()];
        let mut visited = HashSet::new();
        let variants = engine
            .decompose(1_000_040, &hints, &mut visited, 0)
            .expect("decompose");

        assert_eq!(variants.len(), 1);
        assert!(variants[0].notes.as_deref().expect("notes").contains("explicit_text"));
        assert_eq!(variants[0].files, vec!["Kikyo_Dress.zip".to_string()]);
    }

    #[test]
    fn warm_cache_decomposition_is_idempotent_and_offline() {
        let (transport, script) = ScriptedTransport::new();
        script.borrow_mut().insert_page(
            &item_page_url(1_000_050),
            r#"<html><head><meta property="og:title" content="Onepiece Set"></head>
               <body><div class="item-description">対応アバター: ルルネ、瑞希</div></body></html>"#,
        );
        let mut fetch = context(transport);
        let dictionary = AvatarDictionary::new();

        let first = {
            let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);
            let mut visited = HashSet::new();
            engine.decompose(1_000_050, &[], &mut visited, 0).expect("decompose")
        };
        let requests_after_first = script.borrow().requested.len();
        let second = {
            let mut engine = DecomposeEngine::new(&mut fetch, &dictionary);
            let mut visited = HashSet::new();
            engine.decompose(1_000_050, &[], &mut visited, 0).expect("decompose")
        };

        assert_eq!(first, second);
        assert_eq!(script.borrow().requested.len(), requests_after_first);
    }
}
