//! PRTS wiki voice source backed by `ureq`.
//!
//! Voice keys come from the `data-voice-base` attribute on a character's
//! voice-record page; clips are numbered `cn_001.wav`, `cn_002.wav`, ... under
//! each key.

use std::io::Read;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::{debug, info};

use crate::config::NetworkConfig;
use crate::source::{
    detect_image_extension, ClipPayload, FetchFailure, SourceError, SourceVoiceKey, VoiceSource,
};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const VOICE_BASE_ATTRIBUTE: &str = "data-voice-base=\"";
const OG_IMAGE_MARKER: &str = "<meta property=\"og:image\" content=\"";
const VOICE_KEY_HEADER_TAG: &str = "语音key";
const RATE_LIMIT_POLL: Duration = Duration::from_millis(25);
const MAX_CLIP_BYTES: u64 = 32 * 1024 * 1024;

pub struct PrtsWikiSource {
    http_client: ureq::Agent,
    wiki_base_url: String,
    asset_base_url: String,
    read_timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
    limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

fn classify_ureq_failure(error: ureq::Error) -> FetchFailure {
    match error {
        ureq::Error::Status(code, _) => FetchFailure::from_status(code),
        ureq::Error::Transport(transport) => FetchFailure::Transport(transport.to_string()),
    }
}

fn read_failure(error: std::io::Error) -> FetchFailure {
    FetchFailure::Transport(format!("Failed to read response: {error}"))
}

fn decode_html_attribute(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn attribute_after<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Extracts `tag:key` pairs from the voice-record page, in page order.
pub fn parse_voice_base(html: &str) -> Vec<SourceVoiceKey> {
    let Some(raw) = attribute_after(html, VOICE_BASE_ATTRIBUTE) else {
        return Vec::new();
    };
    decode_html_attribute(raw)
        .split(',')
        .filter_map(|item| {
            let (tag, key) = item.split_once(':')?;
            let tag = tag.trim();
            let key = key.trim();
            if tag.is_empty() || key.is_empty() || tag == VOICE_KEY_HEADER_TAG {
                return None;
            }
            Some(SourceVoiceKey {
                tag: tag.to_string(),
                key: key.to_string(),
            })
        })
        .collect()
}

/// Absolute `og:image` URL from a file page.
pub fn parse_og_image(html: &str, wiki_base_url: &str) -> Option<String> {
    let raw = decode_html_attribute(attribute_after(html, OG_IMAGE_MARKER)?);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("//") {
        return Some(format!("https:{trimmed}"));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(trimmed.to_string());
    }
    Some(format!(
        "{}/{}",
        wiki_base_url.trim_end_matches('/'),
        trimmed.trim_start_matches('/')
    ))
}

impl PrtsWikiSource {
    pub fn new(config: &NetworkConfig) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout_read(Duration::from_millis(config.read_timeout_ms))
            .timeout_write(Duration::from_millis(config.read_timeout_ms))
            .user_agent(USER_AGENT)
            .build();
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            http_client,
            wiki_base_url: config.wiki_base_url.trim_end_matches('/').to_string(),
            asset_base_url: config.asset_base_url.trim_end_matches('/').to_string(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn voice_record_url(&self, character: &str) -> String {
        format!(
            "{}/w/{}/{}",
            self.wiki_base_url,
            urlencoding::encode(character),
            urlencoding::encode("语音记录")
        )
    }

    pub fn clip_url(&self, asset_key: &str, index: u32) -> String {
        format!(
            "{}/{}/cn_{index:03}.wav",
            self.asset_base_url,
            asset_key.trim_matches('/')
        )
    }

    fn portrait_page_url(&self, character: &str) -> String {
        format!(
            "{}/w/{}",
            self.wiki_base_url,
            urlencoding::encode(&format!("文件:头像_{character}.png"))
        )
    }

    fn wait_for_rate_limit_slot(&self) {
        let started = Instant::now();
        while self.limiter.check().is_err() {
            std::thread::sleep(RATE_LIMIT_POLL);
        }
        let waited = started.elapsed();
        if waited > RATE_LIMIT_POLL {
            debug!("Waited {:?} for a request slot", waited);
        }
    }

    /// Runs `operation`, retrying transient failures with a fixed delay.
    fn execute_with_retry<T, F>(&self, label: &str, mut operation: F) -> Result<T, FetchFailure>
    where
        F: FnMut(&Self) -> Result<T, FetchFailure>,
    {
        let mut attempt = 1u32;
        loop {
            self.wait_for_rate_limit_slot();
            match operation(self) {
                Ok(value) => return Ok(value),
                Err(failure) if failure.is_retryable() && attempt < self.max_attempts => {
                    info!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        label, attempt, failure, self.retry_delay
                    );
                    std::thread::sleep(self.retry_delay);
                    attempt = attempt.saturating_add(1);
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    fn get_once(&self, url: &str) -> Result<ureq::Response, FetchFailure> {
        self.http_client
            .get(url)
            .set("Referer", &format!("{}/", self.wiki_base_url))
            .timeout(self.read_timeout)
            .call()
            .map_err(classify_ureq_failure)
    }

    fn head_once(&self, url: &str) -> Result<ureq::Response, FetchFailure> {
        self.http_client
            .head(url)
            .set("Referer", &format!("{}/", self.wiki_base_url))
            .timeout(self.read_timeout)
            .call()
            .map_err(classify_ureq_failure)
    }

    fn get_text(&self, url: &str, label: &str) -> Result<String, FetchFailure> {
        self.execute_with_retry(label, |source| {
            source
                .get_once(url)?
                .into_string()
                .map_err(read_failure)
        })
    }

    fn get_bytes(&self, url: &str, label: &str) -> Result<(Vec<u8>, String), FetchFailure> {
        self.execute_with_retry(label, |source| {
            let response = source.get_once(url)?;
            let content_type = response.content_type().to_string();
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_CLIP_BYTES)
                .read_to_end(&mut bytes)
                .map_err(read_failure)?;
            Ok((bytes, content_type))
        })
    }
}

impl VoiceSource for PrtsWikiSource {
    fn voice_keys(&self, character: &str) -> Result<Vec<SourceVoiceKey>, SourceError> {
        let url = self.voice_record_url(character);
        let html = match self.get_text(&url, "voice record") {
            Ok(html) => html,
            Err(FetchFailure::NotFound) => return Err(SourceError::NotFoundUpstream),
            Err(failure) => return Err(SourceError::Transport(failure.to_string())),
        };
        let keys = parse_voice_base(&html);
        if keys.is_empty() {
            debug!("Voice record page for {} has no voice keys", character);
            return Err(SourceError::NotFoundUpstream);
        }
        Ok(keys)
    }

    fn probe_clip(&self, asset_key: &str, index: u32) -> Result<bool, FetchFailure> {
        let url = self.clip_url(asset_key, index);
        match self.execute_with_retry("clip probe", |source| source.head_once(&url)) {
            Ok(_) => Ok(true),
            Err(FetchFailure::NotFound) => Ok(false),
            Err(failure) => Err(failure),
        }
    }

    fn fetch_clip(&self, asset_key: &str, index: u32) -> Result<ClipPayload, FetchFailure> {
        let url = self.clip_url(asset_key, index);
        let (bytes, content_type) = self.get_bytes(&url, "clip download")?;
        Ok(ClipPayload {
            bytes,
            content_type,
        })
    }

    fn fetch_portrait(&self, character: &str) -> Result<Option<Vec<u8>>, FetchFailure> {
        let page_url = self.portrait_page_url(character);
        let html = match self.get_text(&page_url, "portrait page") {
            Ok(html) => html,
            Err(FetchFailure::NotFound) => return Ok(None),
            Err(failure) => return Err(failure),
        };
        let Some(image_url) = parse_og_image(&html, &self.wiki_base_url) else {
            return Ok(None);
        };
        let (bytes, content_type) = self.get_bytes(&image_url, "portrait download")?;
        if detect_image_extension(&bytes).is_none() {
            return Err(FetchFailure::ContentMismatch(content_type));
        }
        Ok(Some(bytes))
    }
}
