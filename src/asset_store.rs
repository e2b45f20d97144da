//! On-disk layout of cached voice clips and portraits.
//!
//! ```text
//! <data_dir>/voices/<character>/<lang>/<label>.wav
//! <data_dir>/voices/<character>/skin/<lang>/<label>.wav
//! <data_dir>/assets/<character>.png
//! ```
//!
//! Files on disk are the only proof that a clip exists.

use std::fs;
use std::path::{Path, PathBuf};

use crate::character::CharacterKey;
use crate::clip_label::{sanitize_file_stem, CLIP_EXTENSION};
use crate::language::LanguageCode;

pub const VOICES_DIR_NAME: &str = "voices";
pub const ASSETS_DIR_NAME: &str = "assets";
pub const SKIN_DIR_NAME: &str = "skin";
const PORTRAIT_EXTENSION: &str = "png";

#[derive(Debug, Clone)]
pub struct AssetStore {
    data_dir: PathBuf,
    voices_dir: PathBuf,
    assets_dir: PathBuf,
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent)
        .map_err(|error| format!("Failed to create {}: {error}", parent.display()))
}

fn write_atomic(target_path: &Path, bytes: &[u8]) -> Result<(), String> {
    ensure_parent_dir(target_path)?;
    let mut temp_name = target_path.as_os_str().to_os_string();
    temp_name.push(".part");
    let temp_path = PathBuf::from(temp_name);
    if temp_path.exists() {
        let _ = fs::remove_file(&temp_path);
    }
    fs::write(&temp_path, bytes)
        .map_err(|error| format!("Failed to write {}: {error}", temp_path.display()))?;
    fs::rename(&temp_path, target_path).map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        format!("Failed to move clip into {}: {error}", target_path.display())
    })
}

impl AssetStore {
    /// Opens (and creates, if needed) the store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, String> {
        let data_dir = data_dir.into();
        let store = Self {
            voices_dir: data_dir.join(VOICES_DIR_NAME),
            assets_dir: data_dir.join(ASSETS_DIR_NAME),
            data_dir,
        };
        for dir in [&store.data_dir, &store.voices_dir, &store.assets_dir] {
            fs::create_dir_all(dir)
                .map_err(|error| format!("Failed to create {}: {error}", dir.display()))?;
        }
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn voices_dir(&self) -> &Path {
        &self.voices_dir
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// Directory holding one character's clips in one language.
    ///
    /// Skin keys resolve inside the base character's directory.
    pub fn language_dir(&self, character: &CharacterKey, language: LanguageCode) -> PathBuf {
        let base_dir = self.voices_dir.join(character.base_name());
        if character.is_skin() {
            base_dir.join(SKIN_DIR_NAME).join(language.code())
        } else {
            base_dir.join(language.code())
        }
    }

    pub fn clip_path(
        &self,
        character: &CharacterKey,
        language: LanguageCode,
        label: &str,
    ) -> PathBuf {
        self.language_dir(character, language)
            .join(format!("{}.{CLIP_EXTENSION}", sanitize_file_stem(label)))
    }

    pub fn existing_clip_path(
        &self,
        character: &CharacterKey,
        language: LanguageCode,
        label: &str,
    ) -> Option<PathBuf> {
        let path = self.clip_path(character, language, label);
        path.is_file().then_some(path)
    }

    /// Writes the full payload, then moves it into place.
    pub fn write_clip(
        &self,
        character: &CharacterKey,
        language: LanguageCode,
        label: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, String> {
        let path = self.clip_path(character, language, label);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn portrait_path(&self, character: &CharacterKey) -> PathBuf {
        self.assets_dir
            .join(format!("{}.{PORTRAIT_EXTENSION}", character.base_name()))
    }

    pub fn write_portrait(&self, character: &CharacterKey, bytes: &[u8]) -> Result<PathBuf, String> {
        let path = self.portrait_path(character);
        write_atomic(&path, bytes)?;
        Ok(path)
    }
}
