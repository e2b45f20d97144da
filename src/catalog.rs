//! Catalog index: which characters have which languages and clips on disk.
//!
//! The index is rebuilt from scratch by scanning the asset store. A JSON
//! snapshot is written next to the store for external tooling; the store
//! itself stays authoritative.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::asset_store::{AssetStore, SKIN_DIR_NAME};
use crate::character::CharacterKey;
use crate::clip_label::{label_order, CLIP_EXTENSION};
use crate::language::LanguageCode;

pub const SNAPSHOT_FILE_NAME: &str = "voice_index.json";

/// One clip file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ClipRecord {
    pub language: LanguageCode,
    pub label: String,
    pub filename: String,
}

/// Everything catalogued for one character key.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CatalogEntry {
    /// Populated languages, in `LanguageCode` declaration order.
    pub languages: Vec<LanguageCode>,
    /// Clips ordered by language, then by vocabulary position.
    pub clips: Vec<ClipRecord>,
}

impl CatalogEntry {
    fn sort_key(record: &ClipRecord) -> (LanguageCode, usize, &str) {
        (record.language, label_order(&record.label), record.label.as_str())
    }

    fn insert(&mut self, record: ClipRecord) {
        if self
            .clips
            .iter()
            .any(|existing| existing.language == record.language && existing.label == record.label)
        {
            return;
        }
        let position = self
            .clips
            .partition_point(|existing| Self::sort_key(existing) < Self::sort_key(&record));
        if !self.languages.contains(&record.language) {
            self.languages.push(record.language);
            self.languages.sort();
        }
        self.clips.insert(position, record);
    }

    pub fn labels(&self, language: LanguageCode) -> Vec<&str> {
        self.clips
            .iter()
            .filter(|record| record.language == language)
            .map(|record| record.label.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogIndex {
    entries: BTreeMap<CharacterKey, CatalogEntry>,
}

fn is_clip_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(CLIP_EXTENSION))
        .unwrap_or(false)
}

fn subdirectories(dir: &Path) -> Vec<(String, std::path::PathBuf)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Failed to read directory {}: {}", dir.display(), err);
            return Vec::new();
        }
    };
    let mut dirs: Vec<(String, std::path::PathBuf)> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some((name, entry.path()))
        })
        .collect();
    dirs.sort();
    dirs
}

/// Clip records for every `.wav` file directly inside `language_dir`.
fn scan_language_dir(language: LanguageCode, language_dir: &Path) -> Vec<ClipRecord> {
    let entries = match fs::read_dir(language_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Failed to read directory {}: {}", language_dir.display(), err);
            return Vec::new();
        }
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| is_clip_file(path))
        .filter_map(|path| {
            let filename = path.file_name()?.to_str()?.to_string();
            let label = path.file_stem()?.to_str()?.to_string();
            Some(ClipRecord {
                language,
                label,
                filename,
            })
        })
        .collect()
}

/// Scans `<dir>/<lang>/` folders; skips `skin` and unknown language names.
fn scan_language_dirs(dir: &Path) -> CatalogEntry {
    let mut entry = CatalogEntry::default();
    for (name, path) in subdirectories(dir) {
        if name == SKIN_DIR_NAME {
            continue;
        }
        let Some(language) = LanguageCode::from_code(&name) else {
            debug!("Ignoring unknown language directory {}", path.display());
            continue;
        };
        for record in scan_language_dir(language, &path) {
            entry.insert(record);
        }
    }
    entry
}

impl CatalogIndex {
    /// Builds an index reflecting exactly the clips under `voices_dir`.
    pub fn scan(voices_dir: &Path) -> Self {
        let mut entries = BTreeMap::new();
        for (name, character_dir) in subdirectories(voices_dir) {
            let key = CharacterKey::new(name.as_str());
            if key.as_str() != name {
                debug!(
                    "Ignoring directory {}; not a valid character name",
                    character_dir.display()
                );
                continue;
            }
            if key.is_skin() {
                debug!(
                    "Ignoring top-level skin directory {}; skin clips live under the base character",
                    character_dir.display()
                );
                continue;
            }

            let base_entry = scan_language_dirs(&character_dir);
            if !base_entry.clips.is_empty() {
                entries.insert(key.clone(), base_entry);
            }

            let skin_dir = character_dir.join(SKIN_DIR_NAME);
            if skin_dir.is_dir() {
                let skin_entry = scan_language_dirs(&skin_dir);
                if !skin_entry.clips.is_empty() {
                    entries.insert(CharacterKey::skin_of(key.as_str()), skin_entry);
                }
            }
        }
        Self { entries }
    }

    pub fn get(&self, character: &CharacterKey) -> Option<&CatalogEntry> {
        self.entries.get(character)
    }

    pub fn languages(&self, character: &CharacterKey) -> Option<&[LanguageCode]> {
        self.entries
            .get(character)
            .map(|entry| entry.languages.as_slice())
    }

    pub fn contains(&self, character: &CharacterKey) -> bool {
        self.entries.contains_key(character)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CharacterKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CharacterKey, &CatalogEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clip_count(&self) -> usize {
        self.entries.values().map(|entry| entry.clips.len()).sum()
    }

    /// Records a freshly written clip without rescanning.
    pub fn record_clip(
        &mut self,
        character: &CharacterKey,
        language: LanguageCode,
        label: &str,
        filename: &str,
    ) {
        self.entries
            .entry(character.clone())
            .or_default()
            .insert(ClipRecord {
                language,
                label: label.to_string(),
                filename: filename.to_string(),
            });
    }

    pub fn to_snapshot_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(&self.entries)
            .map_err(|error| format!("Failed to serialize catalog snapshot: {error}"))
    }

    pub fn persist_snapshot(&self, path: &Path) -> Result<(), String> {
        let json = self.to_snapshot_json()?;
        fs::write(path, json)
            .map_err(|error| format!("Failed to write {}: {error}", path.display()))
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|error| format!("Failed to read {}: {error}", path.display()))?;
        let entries = serde_json::from_str(&content)
            .map_err(|error| format!("Invalid catalog snapshot {}: {error}", path.display()))?;
        Ok(Self { entries })
    }
}

/// Rescans the store and writes the snapshot; snapshot failures are only logged.
pub fn rebuild(store: &AssetStore) -> CatalogIndex {
    let index = CatalogIndex::scan(store.voices_dir());
    debug!(
        "Catalog rebuilt: {} character key(s), {} clip(s)",
        index.len(),
        index.clip_count()
    );
    let snapshot_path = store.data_dir().join(SNAPSHOT_FILE_NAME);
    if let Err(error) = index.persist_snapshot(&snapshot_path) {
        warn!("Failed to persist catalog snapshot: {}", error);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::{rebuild, CatalogIndex, SNAPSHOT_FILE_NAME};
    use crate::asset_store::AssetStore;
    use crate::character::CharacterKey;
    use crate::language::LanguageCode;
    use crate::test_support::{touch_clip, TempDir};

    #[test]
    fn test_scan_collects_languages_and_skin_variant() {
        let temp = TempDir::new("catalog_scan");
        let store = AssetStore::open(temp.path()).expect("store should open");
        touch_clip(store.voices_dir(), "陈/cn/问候.wav");
        touch_clip(store.voices_dir(), "陈/jp/交谈1.wav");
        touch_clip(store.voices_dir(), "陈/skin/jp/闲置.wav");

        let index = CatalogIndex::scan(store.voices_dir());

        assert_eq!(
            index.languages(&CharacterKey::new("陈")),
            Some(&[LanguageCode::Cn, LanguageCode::Jp][..])
        );
        assert_eq!(
            index.languages(&CharacterKey::skin_of("陈")),
            Some(&[LanguageCode::Jp][..])
        );
        let skin_entry = index
            .get(&CharacterKey::skin_of("陈"))
            .expect("skin entry should exist");
        assert_eq!(skin_entry.labels(LanguageCode::Jp), vec!["闲置"]);
    }

    #[test]
    fn test_scan_omits_empty_and_unknown_language_directories() {
        let temp = TempDir::new("catalog_empty");
        let store = AssetStore::open(temp.path()).expect("store should open");
        std::fs::create_dir_all(store.voices_dir().join("空/cn")).expect("dir creatable");
        std::fs::create_dir_all(store.voices_dir().join("陈/skin/jp")).expect("dir creatable");
        touch_clip(store.voices_dir(), "陈/xx/问候.wav");
        touch_clip(store.voices_dir(), "陈/cn/notes.txt");

        let index = CatalogIndex::scan(store.voices_dir());

        assert!(index.is_empty());
    }

    #[test]
    fn test_scan_is_idempotent_without_filesystem_changes() {
        let temp = TempDir::new("catalog_idempotent");
        let store = AssetStore::open(temp.path()).expect("store should open");
        touch_clip(store.voices_dir(), "阿米娅/cn/问候.wav");
        touch_clip(store.voices_dir(), "阿米娅/cn/任命助理.wav");
        touch_clip(store.voices_dir(), "凯尔希/jp/闲置.wav");

        let first = rebuild(&store);
        let second = rebuild(&store);

        assert_eq!(first, second);
        assert_eq!(first.clip_count(), 3);
    }

    #[test]
    fn test_clips_are_ordered_by_vocabulary() {
        let temp = TempDir::new("catalog_order");
        let store = AssetStore::open(temp.path()).expect("store should open");
        touch_clip(store.voices_dir(), "阿米娅/cn/问候.wav");
        touch_clip(store.voices_dir(), "阿米娅/cn/任命助理.wav");
        touch_clip(store.voices_dir(), "阿米娅/cn/交谈1.wav");

        let index = CatalogIndex::scan(store.voices_dir());
        let entry = index
            .get(&CharacterKey::new("阿米娅"))
            .expect("entry should exist");
        assert_eq!(
            entry.labels(LanguageCode::Cn),
            vec!["任命助理", "交谈1", "问候"]
        );
    }

    #[test]
    fn test_record_clip_matches_rescan() {
        let temp = TempDir::new("catalog_record");
        let store = AssetStore::open(temp.path()).expect("store should open");
        let key = CharacterKey::new("陈");
        let mut index = CatalogIndex::scan(store.voices_dir());

        let path = store
            .write_clip(&key, LanguageCode::Cn, "问候", b"RIFF")
            .expect("clip should be written");
        index.record_clip(&key, LanguageCode::Cn, "问候", "问候.wav");
        index.record_clip(&key, LanguageCode::Cn, "问候", "问候.wav");

        assert!(path.exists());
        assert_eq!(index, CatalogIndex::scan(store.voices_dir()));
    }

    #[test]
    fn test_rebuild_persists_snapshot_that_loads_back() {
        let temp = TempDir::new("catalog_snapshot");
        let store = AssetStore::open(temp.path()).expect("store should open");
        touch_clip(store.voices_dir(), "陈/cn/问候.wav");

        let index = rebuild(&store);
        let snapshot_path = temp.path().join(SNAPSHOT_FILE_NAME);
        let content = std::fs::read_to_string(&snapshot_path).expect("snapshot should exist");
        assert!(content.contains("陈"));
        assert_eq!(
            CatalogIndex::load_snapshot(&snapshot_path).expect("snapshot should load"),
            index
        );
    }

    #[test]
    fn test_rebuild_survives_unwritable_snapshot_path() {
        let temp = TempDir::new("catalog_snapshot_blocked");
        let store = AssetStore::open(temp.path()).expect("store should open");
        touch_clip(store.voices_dir(), "陈/cn/问候.wav");
        std::fs::create_dir_all(temp.path().join(SNAPSHOT_FILE_NAME))
            .expect("blocking dir should be creatable");

        let index = rebuild(&store);

        assert!(index.contains(&CharacterKey::new("陈")));
    }
}
