//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::source::{ClipPayload, FetchFailure, SourceError, SourceVoiceKey, VoiceSource};

static TEMP_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Unique directory under the system temp dir, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(name: &str) -> Self {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        let sequence = TEMP_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("voicebank_{name}_{nonce}_{sequence}"));
        fs::create_dir_all(&path).expect("temp dir should be creatable");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn wav_bytes(marker: u8) -> Vec<u8> {
    let mut bytes = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
    bytes.push(marker);
    bytes
}

pub fn touch_clip(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("clip path has a parent"))
        .expect("clip dir should be creatable");
    fs::write(path, wav_bytes(0)).expect("clip should be writable");
}

/// Scripted upstream: voice keys per character and per-key clip slots.
#[derive(Default)]
pub struct ScriptedSource {
    voice_keys: HashMap<String, Vec<SourceVoiceKey>>,
    query_failures: HashMap<String, SourceError>,
    clips: HashMap<(String, u32), Result<ClipPayload, FetchFailure>>,
    portraits: HashMap<String, Vec<u8>>,
    clip_probes: Mutex<Vec<(String, u32)>>,
    clip_fetches: Mutex<Vec<(String, u32)>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voice_keys(mut self, character: &str, keys: &[(&str, &str)]) -> Self {
        self.voice_keys.insert(
            character.to_string(),
            keys.iter()
                .map(|(tag, key)| SourceVoiceKey {
                    tag: (*tag).to_string(),
                    key: (*key).to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn with_query_failure(mut self, character: &str, error: SourceError) -> Self {
        self.query_failures.insert(character.to_string(), error);
        self
    }

    /// Marks `indices` of `asset_key` as present audio slots.
    pub fn with_audio_slots(mut self, asset_key: &str, indices: impl IntoIterator<Item = u32>) -> Self {
        for index in indices {
            self.clips.insert(
                (asset_key.to_string(), index),
                Ok(ClipPayload {
                    bytes: wav_bytes(index as u8),
                    content_type: "audio/wav".to_string(),
                }),
            );
        }
        self
    }

    pub fn with_slot(
        mut self,
        asset_key: &str,
        index: u32,
        result: Result<ClipPayload, FetchFailure>,
    ) -> Self {
        self.clips.insert((asset_key.to_string(), index), result);
        self
    }

    pub fn with_portrait(mut self, character: &str, bytes: &[u8]) -> Self {
        self.portraits.insert(character.to_string(), bytes.to_vec());
        self
    }

    pub fn clip_probes(&self) -> Vec<(String, u32)> {
        self.clip_probes.lock().expect("slot check log lock").clone()
    }

    pub fn clip_fetches(&self) -> Vec<(String, u32)> {
        self.clip_fetches.lock().expect("fetch log lock").clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("query log lock").clone()
    }
}

impl VoiceSource for ScriptedSource {
    fn voice_keys(&self, character: &str) -> Result<Vec<SourceVoiceKey>, SourceError> {
        self.queries
            .lock()
            .expect("query log lock")
            .push(character.to_string());
        if let Some(error) = self.query_failures.get(character) {
            return Err(error.clone());
        }
        match self.voice_keys.get(character) {
            Some(keys) if !keys.is_empty() => Ok(keys.clone()),
            _ => Err(SourceError::NotFoundUpstream),
        }
    }

    fn probe_clip(&self, asset_key: &str, index: u32) -> Result<bool, FetchFailure> {
        self.clip_probes
            .lock()
            .expect("slot check log lock")
            .push((asset_key.to_string(), index));
        match self.clips.get(&(asset_key.to_string(), index)) {
            None | Some(Err(FetchFailure::NotFound)) => Ok(false),
            Some(Ok(_)) => Ok(true),
            Some(Err(failure)) => Err(failure.clone()),
        }
    }

    fn fetch_clip(&self, asset_key: &str, index: u32) -> Result<ClipPayload, FetchFailure> {
        self.clip_fetches
            .lock()
            .expect("fetch log lock")
            .push((asset_key.to_string(), index));
        self.clips
            .get(&(asset_key.to_string(), index))
            .cloned()
            .unwrap_or(Err(FetchFailure::NotFound))
    }

    fn fetch_portrait(&self, character: &str) -> Result<Option<Vec<u8>>, FetchFailure> {
        Ok(self.portraits.get(character).cloned())
    }
}
