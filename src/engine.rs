//! Voice engine: the single owner of catalog, bindings and source.
//!
//! All lookups go `name resolver -> language resolver -> asset store`, falling
//! back to the acquisition pipeline on a miss.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::acquisition::{AcquisitionOutcome, AcquisitionPipeline, AcquisitionRequest};
use crate::asset_store::AssetStore;
use crate::bindings::{CustomBinding, CustomBindingStore, BINDINGS_FILE_NAME};
use crate::catalog::{self, CatalogIndex};
use crate::character::CharacterKey;
use crate::clip_label::{normalize_label, CLIP_LABELS};
use crate::config::Config;
use crate::language::{self, parse_priority, LanguageChoice, LanguageCode};
use crate::name_resolver;
use crate::source::prts::PrtsWikiSource;
use crate::source::{detect_image_extension, SourceError, VoiceSource};

/// Runtime knobs taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub language_priority: String,
    pub download_languages: String,
    pub auto_download: bool,
    pub auto_download_skin: bool,
    pub catalog_refresh: Duration,
    pub max_file_index: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language_priority: config.voice.language_priority.clone(),
            download_languages: config.voice.download_languages.clone(),
            auto_download: config.voice.auto_download,
            auto_download_skin: config.voice.auto_download_skin,
            catalog_refresh: Duration::from_secs(config.voice.catalog_refresh_secs),
            max_file_index: config.network.max_file_index,
        }
    }
}

/// A lookup with every part optional; missing parts are chosen by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupRequest {
    pub character: Option<String>,
    pub clip: Option<String>,
    pub language: Option<LanguageCode>,
}

/// A lookup that landed on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClip {
    pub character: CharacterKey,
    pub language: LanguageCode,
    pub label: String,
    pub path: PathBuf,
    /// Original query when the name resolver corrected it.
    pub corrected_from: Option<String>,
    /// Whether this lookup had to download voices first.
    pub acquired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    EmptyCatalog,
    UnknownTrigger(String),
    AutoDownloadDisabled(CharacterKey),
    AcquisitionFailed(String),
    NoVoices(CharacterKey),
    LanguageUnavailable {
        character: CharacterKey,
        requested: Option<LanguageCode>,
    },
    ClipNotFound {
        character: CharacterKey,
        language: LanguageCode,
        clip: String,
    },
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCatalog => f.write_str("No character voices have been downloaded yet"),
            Self::UnknownTrigger(trigger) => write!(f, "No custom voice is bound to '{trigger}'"),
            Self::AutoDownloadDisabled(character) => write!(
                f,
                "No voices for {character}; automatic download is disabled, fetch them manually"
            ),
            Self::AcquisitionFailed(message) => write!(f, "Automatic download failed: {message}"),
            Self::NoVoices(character) => write!(f, "No voices found for {character}"),
            Self::LanguageUnavailable {
                character,
                requested: Some(language),
            } => write!(
                f,
                "{character} has no {} voices",
                language.display_name()
            ),
            Self::LanguageUnavailable {
                character,
                requested: None,
            } => write!(f, "{character} has no voices in the configured languages"),
            Self::ClipNotFound {
                character,
                language,
                clip,
            } => write!(f, "{character} has no {language} clip named '{clip}'"),
        }
    }
}

impl std::error::Error for LookupError {}

/// Counts from one portrait sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortraitReport {
    pub fetched: usize,
    pub already_cached: usize,
    pub unavailable: usize,
    pub failed: usize,
}

/// Removes the in-flight marker for a character when the download ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.name);
    }
}

fn random_index(len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if let Err(error) = getrandom::fill(&mut bytes) {
        debug!("Random source unavailable, using first entry: {}", error);
        return 0;
    }
    (u64::from_le_bytes(bytes) % len as u64) as usize
}

pub struct VoiceEngine {
    store: AssetStore,
    source: Box<dyn VoiceSource>,
    settings: EngineSettings,
    catalog: Mutex<CatalogIndex>,
    last_rebuild: Mutex<Option<Instant>>,
    bindings: Mutex<CustomBindingStore>,
    in_flight: Mutex<HashSet<String>>,
}

impl VoiceEngine {
    /// Builds an engine backed by the PRTS wiki.
    pub fn open(config: &Config) -> Result<Self, String> {
        Self::with_source(
            &config.storage.data_dir,
            Box::new(PrtsWikiSource::new(&config.network)),
            EngineSettings::from_config(config),
        )
    }

    /// Opens the store under `data_dir`, scans it and loads bindings.
    pub fn with_source(
        data_dir: &Path,
        source: Box<dyn VoiceSource>,
        settings: EngineSettings,
    ) -> Result<Self, String> {
        let store = AssetStore::open(data_dir)?;
        let index = catalog::rebuild(&store);
        let bindings = CustomBindingStore::load(store.data_dir().join(BINDINGS_FILE_NAME));
        info!(
            "Voice catalog ready: {} character key(s) under {}",
            index.len(),
            store.data_dir().display()
        );
        Ok(Self {
            store,
            source,
            settings,
            catalog: Mutex::new(index),
            last_rebuild: Mutex::new(Some(Instant::now())),
            bindings: Mutex::new(bindings),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Rescans the store unless the last scan is inside the refresh window.
    ///
    /// Returns whether a scan ran.
    pub fn refresh_catalog(&self, force: bool) -> bool {
        let mut last_rebuild = self.last_rebuild.lock().expect("rebuild lock poisoned");
        let fresh = last_rebuild.is_some_and(|at| at.elapsed() < self.settings.catalog_refresh);
        if fresh && !force {
            return false;
        }
        let index = catalog::rebuild(&self.store);
        *self.catalog.lock().expect("catalog lock poisoned") = index;
        *last_rebuild = Some(Instant::now());
        true
    }

    fn with_catalog<T>(&self, read: impl FnOnce(&CatalogIndex) -> T) -> T {
        read(&self.catalog.lock().expect("catalog lock poisoned"))
    }

    pub fn choose_language(&self, character: &CharacterKey, priority: &str) -> LanguageChoice {
        self.with_catalog(|index| language::choose_language(index.languages(character), priority))
    }

    /// Exact or fuzzy match against catalogued character keys.
    pub fn resolve_name(&self, query: &str) -> Option<CharacterKey> {
        self.with_catalog(|index| {
            name_resolver::resolve_name(query, index.keys().map(CharacterKey::as_str))
        })
        .map(CharacterKey::new)
    }

    pub fn get_asset_path(
        &self,
        character: &CharacterKey,
        clip: &str,
        language: LanguageCode,
    ) -> Option<PathBuf> {
        self.store
            .existing_clip_path(character, language, &normalize_label(clip))
    }

    /// Downloads voices for `character`; concurrent calls for one base
    /// character are turned away.
    pub fn acquire(
        &self,
        character: &CharacterKey,
        allow_skin: bool,
        enabled_languages: &str,
    ) -> AcquisitionOutcome {
        let base_name = character.base_name().to_string();
        if !self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .insert(base_name.clone())
        {
            return AcquisitionOutcome::failure(format!(
                "A download for {base_name} is already in progress"
            ));
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            name: base_name,
        };

        let pipeline = AcquisitionPipeline::new(self.source.as_ref(), &self.store, &self.catalog)
            .with_max_file_index(self.settings.max_file_index);
        let request = AcquisitionRequest {
            character,
            allow_skin,
            enabled_languages,
        };
        let outcome = match pipeline.run(&request) {
            Ok(report) => AcquisitionOutcome::from_report(report),
            Err(error) => {
                match &error {
                    SourceError::Transport(message) => {
                        warn!("Voice lookup for {} failed: {}", character, message)
                    }
                    SourceError::NotFoundUpstream => {
                        info!("No upstream voice record for {}", character)
                    }
                }
                AcquisitionOutcome::from_source_error(character, &error)
            }
        };

        if outcome.success {
            self.refresh_catalog(true);
        }
        info!("{}", outcome.message);
        outcome
    }

    /// Each catalogued key with its languages, prioritized ones first.
    pub fn characters(&self) -> Vec<(CharacterKey, Vec<LanguageCode>)> {
        let priority = parse_priority(&self.settings.language_priority);
        self.with_catalog(|index| {
            index
                .iter()
                .map(|(key, entry)| {
                    let mut languages: Vec<LanguageCode> = priority
                        .iter()
                        .copied()
                        .filter(|language| entry.languages.contains(language))
                        .collect();
                    languages.extend(
                        entry
                            .languages
                            .iter()
                            .copied()
                            .filter(|language| !priority.contains(language)),
                    );
                    (key.clone(), languages)
                })
                .collect()
        })
    }

    /// Labels stored for one character and language, in vocabulary order.
    pub fn clips(&self, character: &CharacterKey, language: LanguageCode) -> Vec<String> {
        self.with_catalog(|index| {
            index
                .get(character)
                .map(|entry| {
                    entry
                        .labels(language)
                        .into_iter()
                        .map(str::to_string)
                        .collect::<Vec<String>>()
                })
                .unwrap_or_default()
        })
    }

    fn pick_character(&self) -> Result<CharacterKey, LookupError> {
        self.with_catalog(|index| {
            let keys: Vec<&CharacterKey> = index.keys().collect();
            if keys.is_empty() {
                return Err(LookupError::EmptyCatalog);
            }
            Ok(keys[random_index(keys.len())].clone())
        })
    }

    fn fetch_for_lookup(&self, character: &CharacterKey) -> Result<(), LookupError> {
        if !self.settings.auto_download {
            return Err(LookupError::AutoDownloadDisabled(character.clone()));
        }
        let allow_skin = self.settings.auto_download_skin || character.is_skin();
        let outcome = self.acquire(character, allow_skin, &self.settings.download_languages);
        if !outcome.success {
            return Err(LookupError::AcquisitionFailed(outcome.message));
        }
        Ok(())
    }

    fn pick_language(
        &self,
        character: &CharacterKey,
        requested: Option<LanguageCode>,
    ) -> Result<LanguageCode, LookupError> {
        let choice = match requested {
            Some(language) => {
                let priority = language.rank().to_string();
                self.choose_language(character, &priority)
            }
            None => self.choose_language(character, &self.settings.language_priority),
        };
        match choice {
            LanguageChoice::Chosen(language) => Ok(language),
            LanguageChoice::Unavailable => Err(LookupError::LanguageUnavailable {
                character: character.clone(),
                requested,
            }),
            LanguageChoice::NotCatalogued => Err(LookupError::NoVoices(character.clone())),
        }
    }

    fn pick_clip(
        &self,
        character: &CharacterKey,
        language: LanguageCode,
        clip: Option<&str>,
    ) -> Result<(String, PathBuf), LookupError> {
        let label = match clip {
            Some(clip) => normalize_label(clip),
            None => {
                let labels = self.clips(character, language);
                if labels.is_empty() {
                    return Err(LookupError::NoVoices(character.clone()));
                }
                labels[random_index(labels.len())].clone()
            }
        };
        match self.get_asset_path(character, &label, language) {
            Some(path) => Ok((label, path)),
            None => Err(LookupError::ClipNotFound {
                character: character.clone(),
                language,
                clip: label,
            }),
        }
    }

    /// Resolves a request to a file, downloading voices once if needed.
    pub fn lookup(&self, request: &LookupRequest) -> Result<ResolvedClip, LookupError> {
        self.refresh_catalog(false);

        let mut corrected_from = None;
        let mut acquired = false;
        let character = match request.character.as_deref().map(str::trim) {
            None | Some("") => self.pick_character()?,
            Some(query) => {
                let key = CharacterKey::new(query);
                if self.with_catalog(|index| index.contains(&key)) {
                    key
                } else if let Some(resolved) = self.resolve_name(query) {
                    debug!("Resolved character '{}' to {}", query, resolved);
                    corrected_from = Some(query.to_string());
                    resolved
                } else {
                    self.fetch_for_lookup(&key)?;
                    acquired = true;
                    key
                }
            }
        };

        let language = self.pick_language(&character, request.language)?;
        let picked = match self.pick_clip(&character, language, request.clip.as_deref()) {
            Err(LookupError::ClipNotFound { clip, .. })
                if !acquired && CLIP_LABELS.contains(&clip.as_str()) =>
            {
                // A known label missing on disk usually means an interrupted download.
                self.fetch_for_lookup(&character)?;
                acquired = true;
                self.pick_clip(&character, language, Some(&clip))?
            }
            other => other?,
        };
        let (label, path) = picked;

        Ok(ResolvedClip {
            character,
            language,
            label,
            path,
            corrected_from,
            acquired,
        })
    }

    pub fn bind(
        &self,
        trigger: &str,
        character: CharacterKey,
        clip: &str,
        language: Option<LanguageCode>,
    ) -> Result<Option<CustomBinding>, String> {
        let binding = CustomBinding {
            character,
            clip: normalize_label(clip),
            language,
        };
        self.bindings
            .lock()
            .expect("bindings lock poisoned")
            .bind(trigger, binding)
    }

    pub fn unbind(&self, trigger: &str) -> Result<bool, String> {
        self.bindings
            .lock()
            .expect("bindings lock poisoned")
            .unbind(trigger)
    }

    pub fn binding(&self, trigger: &str) -> Option<CustomBinding> {
        self.bindings
            .lock()
            .expect("bindings lock poisoned")
            .get(trigger)
            .cloned()
    }

    pub fn bindings(&self) -> Vec<(String, CustomBinding)> {
        self.bindings
            .lock()
            .expect("bindings lock poisoned")
            .iter()
            .map(|(trigger, binding)| (trigger.to_string(), binding.clone()))
            .collect()
    }

    /// Looks up the clip bound to `trigger`.
    pub fn resolve_binding(&self, trigger: &str) -> Result<ResolvedClip, LookupError> {
        let binding = self
            .binding(trigger)
            .ok_or_else(|| LookupError::UnknownTrigger(trigger.trim().to_string()))?;
        self.lookup(&LookupRequest {
            character: Some(binding.character.as_str().to_string()),
            clip: Some(binding.clip),
            language: binding.language,
        })
    }

    /// Downloads missing portraits for catalogued base characters.
    pub fn ensure_portraits(&self) -> PortraitReport {
        let bases: Vec<CharacterKey> = self.with_catalog(|index| {
            index
                .keys()
                .filter(|key| !key.is_skin())
                .cloned()
                .collect()
        });
        let mut report = PortraitReport::default();
        for base in bases {
            if self.store.portrait_path(&base).is_file() {
                report.already_cached += 1;
                continue;
            }
            match self.source.fetch_portrait(base.as_str()) {
                Ok(Some(bytes)) if detect_image_extension(&bytes).is_some() => {
                    match self.store.write_portrait(&base, &bytes) {
                        Ok(path) => {
                            debug!("Cached portrait {}", path.display());
                            report.fetched += 1;
                        }
                        Err(error) => {
                            warn!("Failed to store portrait for {}: {}", base, error);
                            report.failed += 1;
                        }
                    }
                }
                Ok(Some(_)) => {
                    warn!("Portrait for {} is not an image", base);
                    report.failed += 1;
                }
                Ok(None) => report.unavailable += 1,
                Err(failure) => {
                    warn!("Failed to fetch portrait for {}: {}", base, failure);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{EngineSettings, LookupError, LookupRequest, VoiceEngine};
    use crate::character::CharacterKey;
    use crate::clip_label::CLIP_LABELS;
    use crate::language::{LanguageChoice, LanguageCode};
    use crate::source::{
        ClipPayload, FetchFailure, SourceError, SourceVoiceKey, VoiceSource,
    };
    use crate::test_support::{touch_clip, ScriptedSource, TempDir};

    const CN_KEY: &str = "voice_cn/char_010_chen";
    const JP_KEY: &str = "voice/char_010_chen";

    fn settings() -> EngineSettings {
        EngineSettings {
            language_priority: "123456".to_string(),
            download_languages: "12".to_string(),
            auto_download: true,
            auto_download_skin: false,
            catalog_refresh: Duration::from_secs(30),
            max_file_index: 50,
        }
    }

    fn chen_source() -> ScriptedSource {
        ScriptedSource::new()
            .with_voice_keys("陈", &[("中文", CN_KEY), ("日语", JP_KEY)])
            .with_audio_slots(CN_KEY, 1..=CLIP_LABELS.len() as u32)
            .with_audio_slots(JP_KEY, 1..=CLIP_LABELS.len() as u32)
    }

    fn engine(temp: &TempDir, source: ScriptedSource, settings: EngineSettings) -> VoiceEngine {
        VoiceEngine::with_source(temp.path(), Box::new(source), settings)
            .expect("engine should open")
    }

    #[test]
    fn test_acquire_then_resolve_end_to_end() {
        let temp = TempDir::new("engine_e2e");
        let engine = engine(&temp, chen_source(), settings());
        let chen = CharacterKey::new("陈");
        assert_eq!(
            engine.choose_language(&chen, "123456"),
            LanguageChoice::NotCatalogued
        );

        let outcome = engine.acquire(&chen, false, "12");

        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(
            engine.choose_language(&chen, "123456"),
            LanguageChoice::Chosen(LanguageCode::Cn)
        );
        assert!(engine
            .get_asset_path(&chen, "问候", LanguageCode::Cn)
            .is_some());
        assert!(engine
            .get_asset_path(&chen, "问候", LanguageCode::Jp)
            .is_none());
    }

    #[test]
    fn test_choose_language_follows_priority_order() {
        let temp = TempDir::new("engine_priority");
        touch_clip(temp.path(), "voices/陈/cn/问候.wav");
        touch_clip(temp.path(), "voices/陈/jp/问候.wav");
        touch_clip(temp.path(), "voices/崖心/kr/问候.wav");
        let engine = engine(&temp, ScriptedSource::new(), settings());

        assert_eq!(
            engine.choose_language(&CharacterKey::new("陈"), "321"),
            LanguageChoice::Chosen(LanguageCode::Jp)
        );
        assert_eq!(
            engine.choose_language(&CharacterKey::new("崖心"), "23"),
            LanguageChoice::Unavailable
        );
    }

    #[test]
    fn test_skin_assets_stay_under_skin_key() {
        let temp = TempDir::new("engine_skin");
        let source = ScriptedSource::new()
            .with_voice_keys("陈", &[("中文(假日)", "voice_cn/char_010_chen_sale")])
            .with_audio_slots("voice_cn/char_010_chen_sale", 1..=3);
        let engine = engine(&temp, source, settings());
        let skin = CharacterKey::skin_of("陈");

        let outcome = engine.acquire(&skin, true, "2");

        assert!(outcome.success, "{}", outcome.message);
        let first = CLIP_LABELS[0];
        assert!(engine.get_asset_path(&skin, first, LanguageCode::Cn).is_some());
        assert!(engine
            .get_asset_path(&CharacterKey::new("陈"), first, LanguageCode::Cn)
            .is_none());
        assert_eq!(
            engine.choose_language(&CharacterKey::new("陈"), "2"),
            LanguageChoice::NotCatalogued
        );
    }

    #[test]
    fn test_acquire_keeps_traversal_names_inside_voice_store() {
        let temp = TempDir::new("engine_traversal");
        let source = ScriptedSource::new()
            .with_voice_keys("_.._escaped", &[("中文", CN_KEY)])
            .with_audio_slots(CN_KEY, [1]);
        let data_dir = temp.path().join("data");
        let engine = VoiceEngine::with_source(&data_dir, Box::new(source), settings())
            .expect("engine should open");

        let outcome = engine.acquire(&CharacterKey::new("../../escaped"), false, "2");

        assert!(outcome.success, "{}", outcome.message);
        assert!(!temp.path().join("escaped").exists());
        let path = engine
            .get_asset_path(&CharacterKey::new("../../escaped"), CLIP_LABELS[0], LanguageCode::Cn)
            .expect("clip should be stored under the sanitized key");
        assert!(path.starts_with(engine.store().voices_dir()));
    }

    #[test]
    fn test_acquire_reports_not_found_upstream() {
        let temp = TempDir::new("engine_not_found");
        let engine = engine(&temp, ScriptedSource::new(), settings());

        let outcome = engine.acquire(&CharacterKey::new("无名"), false, "12");

        assert!(!outcome.success);
        assert!(outcome.report.is_none());
        assert!(outcome.message.contains("无名"));
    }

    #[test]
    fn test_acquire_reports_transport_failure_distinctly() {
        let temp = TempDir::new("engine_transport");
        let source = ScriptedSource::new()
            .with_query_failure("陈", SourceError::Transport("timed out".to_string()));
        let engine = engine(&temp, source, settings());

        let outcome = engine.acquire(&CharacterKey::new("陈"), false, "12");

        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"));
    }

    #[test]
    fn test_lookup_downloads_unknown_character() {
        let temp = TempDir::new("engine_lookup_fetch");
        let engine = engine(&temp, chen_source(), settings());

        let resolved = engine
            .lookup(&LookupRequest {
                character: Some("陈".to_string()),
                clip: Some("问候.wav".to_string()),
                language: None,
            })
            .expect("lookup should download and resolve");

        assert!(resolved.acquired);
        assert_eq!(resolved.language, LanguageCode::Cn);
        assert_eq!(resolved.label, "问候");
        assert!(resolved.path.is_file());
    }

    #[test]
    fn test_lookup_of_label_missing_upstream_does_not_mislabel() {
        let temp = TempDir::new("engine_lookup_sparse");
        let source = ScriptedSource::new()
            .with_voice_keys("陈", &[("中文", CN_KEY)])
            .with_audio_slots(CN_KEY, [1, 2, 4]);
        let engine = engine(&temp, source, settings());
        let chen = CharacterKey::new("陈");
        assert!(engine.acquire(&chen, false, "2").success);

        let result = engine.lookup(&LookupRequest {
            character: Some("陈".to_string()),
            clip: Some(CLIP_LABELS[3].to_string()),
            language: None,
        });

        assert_eq!(
            result,
            Err(LookupError::ClipNotFound {
                character: chen.clone(),
                language: LanguageCode::Cn,
                clip: CLIP_LABELS[3].to_string(),
            })
        );
        let third = engine
            .get_asset_path(&chen, CLIP_LABELS[2], LanguageCode::Cn)
            .expect("third label should hold slot 4");
        assert_eq!(std::fs::read(third).expect("clip readable").last().copied(), Some(4));
    }

    #[test]
    fn test_lookup_corrects_misspelled_name() {
        let temp = TempDir::new("engine_lookup_fuzzy");
        touch_clip(temp.path(), "voices/凯尔希/cn/问候.wav");
        let engine = engine(&temp, ScriptedSource::new(), settings());

        let resolved = engine
            .lookup(&LookupRequest {
                character: Some("凱爾希".to_string()),
                ..LookupRequest::default()
            })
            .expect("lookup should resolve the variant spelling");

        assert_eq!(resolved.character, CharacterKey::new("凯尔希"));
        assert_eq!(resolved.corrected_from.as_deref(), Some("凱爾希"));
        assert_eq!(resolved.label, "问候");
        assert!(!resolved.acquired);
    }

    #[test]
    fn test_lookup_without_auto_download_reports_it() {
        let temp = TempDir::new("engine_lookup_disabled");
        let engine = engine(
            &temp,
            chen_source(),
            EngineSettings {
                auto_download: false,
                ..settings()
            },
        );

        let result = engine.lookup(&LookupRequest {
            character: Some("陈".to_string()),
            ..LookupRequest::default()
        });

        assert_eq!(
            result,
            Err(LookupError::AutoDownloadDisabled(CharacterKey::new("陈")))
        );
    }

    #[test]
    fn test_lookup_random_pick_and_explicit_language() {
        let temp = TempDir::new("engine_lookup_random");
        touch_clip(temp.path(), "voices/陈/cn/问候.wav");
        touch_clip(temp.path(), "voices/陈/cn/交谈1.wav");
        let engine = engine(&temp, ScriptedSource::new(), settings());

        let resolved = engine
            .lookup(&LookupRequest::default())
            .expect("random lookup should succeed");
        assert_eq!(resolved.character, CharacterKey::new("陈"));
        assert!(resolved.label == "问候" || resolved.label == "交谈1");

        let unavailable = engine.lookup(&LookupRequest {
            character: Some("陈".to_string()),
            clip: None,
            language: Some(LanguageCode::Jp),
        });
        assert_eq!(
            unavailable,
            Err(LookupError::LanguageUnavailable {
                character: CharacterKey::new("陈"),
                requested: Some(LanguageCode::Jp),
            })
        );

        let unknown_clip = engine.lookup(&LookupRequest {
            character: Some("陈".to_string()),
            clip: Some("自定义台词".to_string()),
            language: None,
        });
        assert!(matches!(
            unknown_clip,
            Err(LookupError::ClipNotFound { .. })
        ));
    }

    #[test]
    fn test_lookup_on_empty_catalog_reports_it() {
        let temp = TempDir::new("engine_lookup_empty");
        let engine = engine(&temp, ScriptedSource::new(), settings());

        assert_eq!(
            engine.lookup(&LookupRequest::default()),
            Err(LookupError::EmptyCatalog)
        );
    }

    #[test]
    fn test_bindings_resolve_with_language_fallback() {
        let temp = TempDir::new("engine_bindings");
        touch_clip(temp.path(), "voices/陈/jp/问候.wav");
        let engine = engine(&temp, ScriptedSource::new(), settings());

        engine
            .bind("早上好", CharacterKey::new("陈"), "问候.wav", None)
            .expect("bind should persist");
        let resolved = engine
            .resolve_binding("早上好")
            .expect("binding should resolve");

        assert_eq!(resolved.language, LanguageCode::Jp);
        assert_eq!(resolved.label, "问候");
        assert_eq!(
            engine.resolve_binding("没有"),
            Err(LookupError::UnknownTrigger("没有".to_string()))
        );
        assert_eq!(engine.unbind("早上好"), Ok(true));
        assert_eq!(engine.unbind("早上好"), Ok(false));
    }

    #[test]
    fn test_characters_list_languages_in_priority_order() {
        let temp = TempDir::new("engine_characters");
        touch_clip(temp.path(), "voices/陈/cn/问候.wav");
        touch_clip(temp.path(), "voices/陈/jp/问候.wav");
        touch_clip(temp.path(), "voices/陈/jp/交谈1.wav");
        let engine = engine(
            &temp,
            ScriptedSource::new(),
            EngineSettings {
                language_priority: "3".to_string(),
                ..settings()
            },
        );

        assert_eq!(
            engine.characters(),
            vec![(
                CharacterKey::new("陈"),
                vec![LanguageCode::Jp, LanguageCode::Cn]
            )]
        );
        assert_eq!(
            engine.clips(&CharacterKey::new("陈"), LanguageCode::Jp),
            vec!["交谈1".to_string(), "问候".to_string()]
        );
    }

    #[test]
    fn test_ensure_portraits_fetches_missing_only() {
        let temp = TempDir::new("engine_portraits");
        touch_clip(temp.path(), "voices/陈/cn/问候.wav");
        touch_clip(temp.path(), "voices/陈/skin/cn/问候.wav");
        touch_clip(temp.path(), "voices/阿米娅/cn/问候.wav");
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let source = ScriptedSource::new()
            .with_portrait("陈", &png)
            .with_portrait("阿米娅", b"<html>");
        let engine = engine(&temp, source, settings());

        let first = engine.ensure_portraits();
        assert_eq!(first.fetched, 1);
        assert_eq!(first.failed, 1);
        assert!(engine
            .store()
            .portrait_path(&CharacterKey::new("陈"))
            .is_file());

        let second = engine.ensure_portraits();
        assert_eq!(second.already_cached, 1);
        assert_eq!(second.fetched, 0);
    }

    struct GatedSource {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl VoiceSource for GatedSource {
        fn voice_keys(&self, _character: &str) -> Result<Vec<SourceVoiceKey>, SourceError> {
            let _ = self.entered.lock().expect("gate lock").send(());
            let _ = self
                .release
                .lock()
                .expect("gate lock")
                .recv_timeout(Duration::from_secs(5));
            Err(SourceError::NotFoundUpstream)
        }

        fn probe_clip(&self, _asset_key: &str, _index: u32) -> Result<bool, FetchFailure> {
            Ok(false)
        }

        fn fetch_clip(&self, _asset_key: &str, _index: u32) -> Result<ClipPayload, FetchFailure> {
            Err(FetchFailure::NotFound)
        }
    }

    #[test]
    fn test_concurrent_acquire_for_same_character_is_rejected() {
        let temp = TempDir::new("engine_in_flight");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let source = GatedSource {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let engine = VoiceEngine::with_source(temp.path(), Box::new(source), settings())
            .expect("engine should open");
        let chen = CharacterKey::new("陈");

        std::thread::scope(|scope| {
            let first = scope.spawn(|| engine.acquire(&chen, false, "12"));
            entered_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("first acquire should reach the source");

            let second = engine.acquire(&CharacterKey::skin_of("陈"), true, "12");
            assert!(!second.success);
            assert!(second.message.contains("already in progress"));

            release_tx.send(()).expect("gate should be open");
            let first = first.join().expect("first acquire should not panic");
            assert!(!first.success);
        });

        drop(release_tx);
        let again = engine.acquire(&chen, false, "12");
        assert!(!again.message.contains("already in progress"));
    }
}
