//! Trigger-string bindings to specific clips, persisted as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::character::CharacterKey;
use crate::language::LanguageCode;

pub const BINDINGS_FILE_NAME: &str = "custom_voices.json";

/// Target of a custom trigger. A binding without a language resolves it at
/// lookup time through the language priority.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CustomBinding {
    pub character: CharacterKey,
    pub clip: String,
    #[serde(default)]
    pub language: Option<LanguageCode>,
}

/// Bindings keyed by trigger; every mutation is flushed to disk before it returns.
#[derive(Debug)]
pub struct CustomBindingStore {
    path: PathBuf,
    bindings: BTreeMap<String, CustomBinding>,
}

impl CustomBindingStore {
    /// Loads `path`; a missing or unreadable file yields an empty store.
    ///
    /// A malformed file is moved to `<path>.bak` so the next flush cannot
    /// overwrite the only copy of the user's bindings.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bindings = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(bindings) => bindings,
                Err(error) => {
                    warn!(
                        "Ignoring malformed bindings file {}: {}",
                        path.display(),
                        error
                    );
                    set_aside_malformed_file(&path);
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                warn!("Failed to read bindings file {}: {}", path.display(), error);
                BTreeMap::new()
            }
        };
        debug!("Loaded {} custom binding(s)", bindings.len());
        Self { path, bindings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, trigger: &str) -> Option<&CustomBinding> {
        self.bindings.get(trigger.trim())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CustomBinding)> {
        self.bindings
            .iter()
            .map(|(trigger, binding)| (trigger.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Creates or replaces the binding for `trigger`, returning the previous target.
    pub fn bind(
        &mut self,
        trigger: &str,
        binding: CustomBinding,
    ) -> Result<Option<CustomBinding>, String> {
        let trigger = trigger.trim();
        if trigger.is_empty() {
            return Err("Trigger must not be empty".to_string());
        }
        let previous = self.bindings.insert(trigger.to_string(), binding);
        if let Err(error) = self.flush() {
            match &previous {
                Some(previous) => {
                    self.bindings.insert(trigger.to_string(), previous.clone());
                }
                None => {
                    self.bindings.remove(trigger);
                }
            }
            return Err(error);
        }
        Ok(previous)
    }

    /// Removes `trigger`. `Ok(false)` means it was not bound.
    ///
    /// The binding stays in place when the removal cannot be persisted.
    pub fn unbind(&mut self, trigger: &str) -> Result<bool, String> {
        let trigger = trigger.trim();
        let Some(removed) = self.bindings.remove(trigger) else {
            return Ok(false);
        };
        if let Err(error) = self.flush() {
            self.bindings.insert(trigger.to_string(), removed);
            return Err(error);
        }
        Ok(true)
    }

    fn flush(&self) -> Result<(), String> {
        let json = serde_json::to_string_pretty(&self.bindings)
            .map_err(|error| format!("Failed to serialize bindings: {error}"))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("Failed to create {}: {error}", parent.display()))?;
        }
        fs::write(&self.path, json).map_err(|error| {
            let message = format!("Failed to write {}: {error}", self.path.display());
            warn!("{}", message);
            message
        })
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn set_aside_malformed_file(path: &Path) {
    let backup = backup_path(path);
    match fs::rename(path, &backup) {
        Ok(()) => warn!("Moved malformed bindings file to {}", backup.display()),
        Err(error) => warn!(
            "Failed to move malformed bindings file {} aside: {}",
            path.display(),
            error
        ),
    }
}
