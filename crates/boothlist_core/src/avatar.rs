use std::collections::HashMap;

use crate::model::AvatarRef;

/// Static definition of a supported avatar and the alias strings it is
/// known by in listings, filenames and descriptions.
#[derive(Debug, Clone, Copy)]
pub struct AvatarEntry {
    pub code: &'static str,
    pub name_ja: &'static str,
    pub aliases: &'static [&'static str],
}

pub const AVATARS: &[AvatarEntry] = &[
    AvatarEntry {
        code: "Selestia",
        name_ja: "セレスティア",
        aliases: &["セレスティア", "selestia", "SELESTIA", "Celestia"],
    },
    AvatarEntry {
        code: "Kikyo",
        name_ja: "桔梗",
        aliases: &["桔梗", "kikyo", "KIKYO", "kikyou", "Kikyou"],
    },
    AvatarEntry {
        code: "Kanae",
        name_ja: "かなえ",
        aliases: &["かなえ", "kanae", "KANAE", "カナエ"],
    },
    AvatarEntry {
        code: "Shinano",
        name_ja: "しなの",
        aliases: &["しなの", "shinano", "SHINANO", "シナノ"],
    },
    AvatarEntry {
        code: "Manuka",
        name_ja: "マヌカ",
        aliases: &["マヌカ", "manuka", "MANUKA"],
    },
    AvatarEntry {
        code: "Moe",
        name_ja: "萌",
        aliases: &["萌", "moe", "MOE"],
    },
    AvatarEntry {
        code: "Rurune",
        name_ja: "ルルネ",
        aliases: &["ルルネ", "rurune", "RURUNE"],
    },
    AvatarEntry {
        code: "Hakka",
        name_ja: "薄荷",
        aliases: &["薄荷", "hakka", "HAKKA"],
    },
    AvatarEntry {
        code: "Mizuki",
        name_ja: "瑞希",
        aliases: &["瑞希", "mizuki", "MIZUKI"],
    },
];

/// Normalization applied to both dictionary aliases and probe tokens:
/// fullwidth ASCII folded to halfwidth, case folded, whitespace and the
/// common separator symbols stripped. Matching afterwards is exact; there
/// is deliberately no fuzzy matching (precision over recall).
pub fn normalize_token(raw: &str) -> String {
    raw.chars()
        .map(fold_width)
        .filter(|ch| !ch.is_whitespace() && !matches!(ch, '_' | '-' | '・'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn fold_width(ch: char) -> char {
    match ch {
        '\u{3000}' => ' ',
        '\u{FF01}'..='\u{FF5E}' => {
            char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch)
        }
        _ => ch,
    }
}

#[derive(Debug)]
pub struct AvatarDictionary {
    alias_to_code: HashMap<String, &'static AvatarEntry>,
}

impl AvatarDictionary {
    pub fn new() -> Self {
        let mut alias_to_code = HashMap::new();
        for entry in AVATARS {
            alias_to_code.insert(normalize_token(entry.code), entry);
            alias_to_code.insert(normalize_token(entry.name_ja), entry);
            for alias in entry.aliases {
                alias_to_code.insert(normalize_token(alias), entry);
            }
        }
        Self { alias_to_code }
    }

    /// Exact lookup of a single token against the normalized alias set.
    pub fn resolve(&self, token: &str) -> Option<AvatarRef> {
        let normalized = normalize_token(token);
        if normalized.is_empty() {
            return None;
        }
        self.alias_to_code
            .get(&normalized)
            .map(|entry| avatar_ref(entry))
    }

    pub fn by_code(&self, code: &str) -> Option<AvatarRef> {
        AVATARS
            .iter()
            .find(|entry| entry.code == code)
            .map(avatar_ref)
    }

    pub fn entries(&self) -> impl Iterator<Item = &'static AvatarEntry> {
        AVATARS.iter()
    }

    /// Alias strings for one avatar, lowercased, for substring and
    /// filename-token matching.
    pub fn alias_tokens(&self, entry: &AvatarEntry) -> Vec<String> {
        let mut tokens = vec![entry.code.to_lowercase(), entry.name_ja.to_string()];
        for alias in entry.aliases {
            let lowered = alias.to_lowercase();
            if !tokens.contains(&lowered) {
                tokens.push(lowered);
            }
        }
        tokens
    }
}

impl Default for AvatarDictionary {
    fn default() -> Self {
        Self::new()
    }
}

fn avatar_ref(entry: &AvatarEntry) -> AvatarRef {
    AvatarRef {
        code: entry.code.to_string(),
        name: entry.name_ja.to_string(),
    }
}
