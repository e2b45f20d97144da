//! Local voice catalog with fuzzy lookup and on-demand wiki downloads.

pub mod acquisition;
pub mod asset_store;
pub mod bindings;
pub mod catalog;
pub mod character;
pub mod clip_label;
pub mod config;
pub mod engine;
pub mod language;
pub mod name_resolver;
pub mod source;

#[cfg(test)]
mod test_support;

pub use acquisition::{AcquisitionOutcome, AcquisitionReport};
pub use character::CharacterKey;
pub use engine::{EngineSettings, LookupError, LookupRequest, ResolvedClip, VoiceEngine};
pub use language::{LanguageChoice, LanguageCode};
