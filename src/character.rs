//! Character keys and their skin variants.

use std::fmt;

use crate::clip_label::sanitize_file_stem;

/// Suffix that turns a base character name into its skin-variant key.
pub const SKIN_SUFFIX: &str = "皮肤";

/// Catalog key for a voiced character or one of its skin variants.
///
/// Keys double as directory names, so every constructor (deserialization
/// included) reduces the name to a single safe path component.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
#[serde(from = "String")]
pub struct CharacterKey(String);

/// Replaces separators and control characters, strips leading dots, and maps
/// names with nothing left to `_`.
fn sanitize_character_name(name: &str) -> String {
    let cleaned = sanitize_file_stem(name);
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

impl CharacterKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(sanitize_character_name(&name.into()))
    }

    pub fn skin_of(base: &str) -> Self {
        let base = sanitize_character_name(base);
        let base = base.strip_suffix(SKIN_SUFFIX).unwrap_or(&base);
        Self(format!("{base}{SKIN_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_skin(&self) -> bool {
        self.0.len() > SKIN_SUFFIX.len() && self.0.ends_with(SKIN_SUFFIX)
    }

    /// Name of the underlying character; identical to the key for non-skin keys.
    pub fn base_name(&self) -> &str {
        if self.is_skin() {
            &self.0[..self.0.len() - SKIN_SUFFIX.len()]
        } else {
            &self.0
        }
    }

    pub fn base(&self) -> Self {
        Self(self.base_name().to_string())
    }
}

impl fmt::Display for CharacterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharacterKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CharacterKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
