//! Acquisition pipeline: populates the asset store from the upstream source.
//!
//! One request walks `resolve source -> languages -> clips -> download`.
//! Clip probing pairs the fixed label vocabulary with upstream numeric slots
//! through [`ClipCursor`]; downloads run strictly one after another.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::asset_store::AssetStore;
use crate::catalog::CatalogIndex;
use crate::character::CharacterKey;
use crate::clip_label::CLIP_LABELS;
use crate::language::{rank_enabled, LanguageCode};
use crate::source::{is_audio_payload, FetchFailure, SourceError, VoiceSource};

/// Default cap on numeric slots probed per language.
pub const DEFAULT_MAX_FILE_INDEX: u32 = 50;

/// Pairs clip labels with upstream slot numbers.
///
/// The label index only advances after a successful download, while the slot
/// number advances on every probe. Upstream numbering is append-only and may
/// have holes; a hole must not shift later clips onto the wrong label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipCursor {
    label_index: usize,
    file_index: u32,
    max_file_index: u32,
}

impl ClipCursor {
    pub fn new(max_file_index: u32) -> Self {
        Self {
            label_index: 0,
            file_index: 1,
            max_file_index,
        }
    }

    /// Next `(label, slot)` to probe, or `None` once labels or slots run out.
    pub fn current(&self) -> Option<(&'static str, u32)> {
        if self.file_index > self.max_file_index {
            return None;
        }
        CLIP_LABELS
            .get(self.label_index)
            .map(|label| (*label, self.file_index))
    }

    pub fn advance(&mut self, label_satisfied: bool) {
        if label_satisfied {
            self.label_index += 1;
        }
        self.file_index = self.file_index.saturating_add(1);
    }
}

/// Per-item failure; counted, never fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFailure {
    Transport(String),
    Status(u16),
    ContentMismatch(String),
    Filesystem(String),
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "network error: {message}"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::ContentMismatch(content_type) => write!(f, "not audio: {content_type}"),
            Self::Filesystem(message) => write!(f, "filesystem error: {message}"),
        }
    }
}

fn fetch_failure_outcome(failure: FetchFailure) -> DownloadOutcome {
    match failure {
        FetchFailure::NotFound => DownloadOutcome::Absent,
        FetchFailure::Status(code) => DownloadOutcome::Failed(ItemFailure::Status(code)),
        FetchFailure::Transport(message) => {
            DownloadOutcome::Failed(ItemFailure::Transport(message))
        }
        FetchFailure::ContentMismatch(content_type) => {
            DownloadOutcome::Failed(ItemFailure::ContentMismatch(content_type))
        }
    }
}

/// Result of one download step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(PathBuf),
    /// The slot exists and the file was already on disk; the payload was not fetched.
    AlreadyPresent(PathBuf),
    /// The numeric slot does not exist upstream.
    Absent,
    Failed(ItemFailure),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Downloaded(_) | Self::AlreadyPresent(_))
    }
}

/// Counts for one `(target, language)` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTally {
    pub target: CharacterKey,
    pub language: LanguageCode,
    pub downloaded: usize,
    pub already_present: usize,
    pub absent: usize,
    pub failed: usize,
}

impl LanguageTally {
    fn new(target: CharacterKey, language: LanguageCode) -> Self {
        Self {
            target,
            language,
            downloaded: 0,
            already_present: 0,
            absent: 0,
            failed: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.downloaded + self.already_present
    }

    fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded(_) => self.downloaded += 1,
            DownloadOutcome::AlreadyPresent(_) => self.already_present += 1,
            DownloadOutcome::Absent => self.absent += 1,
            DownloadOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub character: CharacterKey,
    pub languages: Vec<LanguageTally>,
}

impl AcquisitionReport {
    pub fn succeeded(&self) -> usize {
        self.languages.iter().map(LanguageTally::succeeded).sum()
    }

    pub fn downloaded(&self) -> usize {
        self.languages.iter().map(|tally| tally.downloaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.languages.iter().map(|tally| tally.failed).sum()
    }

    pub fn summary(&self) -> String {
        let mut message = format!(
            "{}: {} clip(s) available ({} new), {} failed",
            self.character,
            self.succeeded(),
            self.downloaded(),
            self.failed()
        );
        if !self.languages.is_empty() {
            let details: Vec<String> = self
                .languages
                .iter()
                .map(|tally| {
                    format!(
                        "{}/{} {}+{}",
                        tally.target,
                        tally.language,
                        tally.succeeded(),
                        tally.failed
                    )
                })
                .collect();
            message.push_str(&format!(" [{}]", details.join(", ")));
        }
        message
    }
}

/// Status reported to callers instead of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionOutcome {
    pub success: bool,
    pub message: String,
    pub report: Option<AcquisitionReport>,
}

impl AcquisitionOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            report: None,
        }
    }

    /// Zero successful clips counts as failure even when nothing errored.
    pub fn from_report(report: AcquisitionReport) -> Self {
        if report.succeeded() == 0 {
            return Self {
                success: false,
                message: format!("No voice clips could be downloaded for {}", report.character),
                report: Some(report),
            };
        }
        Self {
            success: true,
            message: format!("Download finished: {}", report.summary()),
            report: Some(report),
        }
    }

    pub fn from_source_error(character: &CharacterKey, error: &SourceError) -> Self {
        match error {
            SourceError::NotFoundUpstream => Self::failure(format!(
                "No voice record for {} on the wiki",
                character.base_name()
            )),
            SourceError::Transport(message) => Self::failure(format!(
                "Could not reach the wiki for {}: {message}",
                character.base_name()
            )),
        }
    }
}

/// One acquisition request.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest<'a> {
    pub character: &'a CharacterKey,
    pub allow_skin: bool,
    /// Rank digits of the languages to fetch, e.g. `"12"`.
    pub enabled_languages: &'a str,
}

pub struct AcquisitionPipeline<'a> {
    source: &'a dyn VoiceSource,
    store: &'a AssetStore,
    catalog: &'a Mutex<CatalogIndex>,
    max_file_index: u32,
}

impl<'a> AcquisitionPipeline<'a> {
    pub fn new(
        source: &'a dyn VoiceSource,
        store: &'a AssetStore,
        catalog: &'a Mutex<CatalogIndex>,
    ) -> Self {
        Self {
            source,
            store,
            catalog,
            max_file_index: DEFAULT_MAX_FILE_INDEX,
        }
    }

    pub fn with_max_file_index(mut self, max_file_index: u32) -> Self {
        self.max_file_index = max_file_index.max(1);
        self
    }

    fn record_in_catalog(
        &self,
        target: &CharacterKey,
        language: LanguageCode,
        label: &str,
        path: &std::path::Path,
    ) {
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            return;
        };
        self.catalog
            .lock()
            .expect("catalog lock poisoned")
            .record_clip(target, language, label, filename);
    }

    /// Probes slot `index`, then fetches it unless the label is already on disk.
    ///
    /// The probe runs even for files on disk so that a slot missing upstream
    /// stays a hole on every run and never shifts later labels.
    pub fn download_clip(
        &self,
        target: &CharacterKey,
        language: LanguageCode,
        label: &str,
        asset_key: &str,
        index: u32,
    ) -> DownloadOutcome {
        match self.source.probe_clip(asset_key, index) {
            Ok(true) => {}
            Ok(false) => return DownloadOutcome::Absent,
            Err(failure) => return fetch_failure_outcome(failure),
        }

        if let Some(existing) = self.store.existing_clip_path(target, language, label) {
            self.record_in_catalog(target, language, label, &existing);
            return DownloadOutcome::AlreadyPresent(existing);
        }

        let payload = match self.source.fetch_clip(asset_key, index) {
            Ok(payload) => payload,
            Err(failure) => return fetch_failure_outcome(failure),
        };
        if !is_audio_payload(&payload.content_type, &payload.bytes) {
            return DownloadOutcome::Failed(ItemFailure::ContentMismatch(payload.content_type));
        }

        match self
            .store
            .write_clip(target, language, label, &payload.bytes)
        {
            Ok(path) => {
                self.record_in_catalog(target, language, label, &path);
                DownloadOutcome::Downloaded(path)
            }
            Err(message) => DownloadOutcome::Failed(ItemFailure::Filesystem(message)),
        }
    }

    /// Walks the label vocabulary against numeric slots of `asset_key`.
    pub fn acquire_language(
        &self,
        target: &CharacterKey,
        language: LanguageCode,
        asset_key: &str,
    ) -> LanguageTally {
        let mut tally = LanguageTally::new(target.clone(), language);
        let mut cursor = ClipCursor::new(self.max_file_index);
        while let Some((label, index)) = cursor.current() {
            let outcome = self.download_clip(target, language, label, asset_key, index);
            match &outcome {
                DownloadOutcome::Failed(failure) => {
                    debug!(
                        "{}/{} slot {} ({}) failed: {}",
                        target, language, index, label, failure
                    );
                }
                DownloadOutcome::Absent => {
                    debug!("{}/{} slot {} is absent upstream", target, language, index);
                }
                DownloadOutcome::Downloaded(path) => {
                    debug!("{}/{} slot {} -> {}", target, language, index, path.display());
                }
                DownloadOutcome::AlreadyPresent(_) => {}
            }
            tally.record(&outcome);
            cursor.advance(outcome.is_success());
        }
        tally
    }

    /// Runs a full request. Only an upstream lookup failure aborts it.
    pub fn run(&self, request: &AcquisitionRequest<'_>) -> Result<AcquisitionReport, SourceError> {
        let base = request.character.base();
        let voice_keys = self.source.voice_keys(base.as_str())?;
        let mut report = AcquisitionReport {
            character: request.character.clone(),
            languages: Vec::new(),
        };

        for voice_key in &voice_keys {
            let language = voice_key.language();
            if !rank_enabled(language, request.enabled_languages) {
                debug!(
                    "Skipping {} voice set '{}': language disabled",
                    base, voice_key.tag
                );
                continue;
            }
            let is_skin = voice_key.is_skin();
            if is_skin && !request.allow_skin {
                debug!(
                    "Skipping {} voice set '{}': skin downloads disabled",
                    base, voice_key.tag
                );
                continue;
            }
            let target = if is_skin {
                CharacterKey::skin_of(base.as_str())
            } else {
                base.clone()
            };

            info!("Downloading {} voices for {}", language, target);
            let tally = self.acquire_language(&target, language, &voice_key.key);
            if tally.failed > 0 {
                warn!(
                    "{}/{}: {} clip(s) failed to download",
                    target, language, tally.failed
                );
            }
            report.languages.push(tally);
        }

        Ok(report)
    }
}
