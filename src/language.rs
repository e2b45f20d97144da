//! Closed language set, rank table, and the priority-driven language resolver.

use std::fmt;

/// Voice-over language of a clip set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    Cn,
    Jp,
    Us,
    Kr,
    Fy,
    It,
}

pub const ALL_LANGUAGES: [LanguageCode; 6] = [
    LanguageCode::Cn,
    LanguageCode::Jp,
    LanguageCode::Us,
    LanguageCode::Kr,
    LanguageCode::Fy,
    LanguageCode::It,
];

impl LanguageCode {
    /// Directory and config code, e.g. `cn`.
    pub fn code(self) -> &'static str {
        match self {
            Self::Cn => "cn",
            Self::Jp => "jp",
            Self::Us => "us",
            Self::Kr => "kr",
            Self::Fy => "fy",
            Self::It => "it",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Cn => "中文",
            Self::Jp => "日语",
            Self::Us => "英语",
            Self::Kr => "韩语",
            Self::Fy => "方言",
            Self::It => "意语",
        }
    }

    /// Digit used for this language in priority strings.
    pub fn rank(self) -> char {
        match self {
            Self::Fy => '1',
            Self::Cn => '2',
            Self::Jp => '3',
            Self::Us => '4',
            Self::Kr => '5',
            Self::It => '6',
        }
    }

    pub fn from_rank(rank: char) -> Option<Self> {
        ALL_LANGUAGES
            .iter()
            .copied()
            .find(|language| language.rank() == rank)
    }

    pub fn from_code(code: &str) -> Option<Self> {
        ALL_LANGUAGES
            .iter()
            .copied()
            .find(|language| language.code() == code)
    }

    /// Accepts a code, a display name or alias, or a rank digit.
    pub fn from_alias(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let lowered = trimmed.to_ascii_lowercase();
        if let Some(language) = Self::from_code(&lowered) {
            return Some(language);
        }
        let mut chars = trimmed.chars();
        if let (Some(single), None) = (chars.next(), chars.next()) {
            if let Some(language) = Self::from_rank(single) {
                return Some(language);
            }
        }
        match trimmed {
            "中文" | "普通话" | "汉语" => Some(Self::Cn),
            "日语" | "日文" => Some(Self::Jp),
            "英语" | "英文" => Some(Self::Us),
            "韩语" | "韩文" => Some(Self::Kr),
            "方言" => Some(Self::Fy),
            "意语" | "意大利语" => Some(Self::It),
            _ => None,
        }
    }

    /// Maps an upstream language tag to a language by keyword.
    ///
    /// Only the part before a skin qualifier such as `(假日)` is inspected.
    /// Tags that mention none of the known keywords are Chinese voice sets.
    pub fn from_source_tag(tag: &str) -> Self {
        let tag = tag.split(['(', '（']).next().unwrap_or(tag);
        if tag.contains('日') {
            Self::Jp
        } else if tag.contains('英') {
            Self::Us
        } else if tag.contains('韩') {
            Self::Kr
        } else if tag.contains('方') {
            Self::Fy
        } else if tag.contains('意') {
            Self::It
        } else {
            Self::Cn
        }
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Expands a priority string into languages, skipping unknown digits and repeats.
pub fn parse_priority(priority: &str) -> Vec<LanguageCode> {
    let mut languages = Vec::new();
    for rank in priority.chars() {
        let Some(language) = LanguageCode::from_rank(rank) else {
            continue;
        };
        if !languages.contains(&language) {
            languages.push(language);
        }
    }
    languages
}

/// Whether `language` is selected by a rank-digit set such as `"123"`.
pub fn rank_enabled(language: LanguageCode, ranks: &str) -> bool {
    ranks.contains(language.rank())
}

/// Result of resolving a character's language against a priority string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageChoice {
    Chosen(LanguageCode),
    /// The character is catalogued, but in none of the prioritized languages.
    Unavailable,
    /// The character has no catalog entry; the caller decides whether to acquire.
    NotCatalogued,
}

impl LanguageChoice {
    pub fn language(self) -> Option<LanguageCode> {
        match self {
            Self::Chosen(language) => Some(language),
            Self::Unavailable | Self::NotCatalogued => None,
        }
    }
}

/// Picks the first language in `priority` order that `available` contains.
///
/// `available` is `None` when the character has no catalog entry.
pub fn choose_language(available: Option<&[LanguageCode]>, priority: &str) -> LanguageChoice {
    let Some(available) = available else {
        return LanguageChoice::NotCatalogued;
    };
    if available.is_empty() {
        return LanguageChoice::NotCatalogued;
    }
    parse_priority(priority)
        .into_iter()
        .find(|language| available.contains(language))
        .map(LanguageChoice::Chosen)
        .unwrap_or(LanguageChoice::Unavailable)
}
