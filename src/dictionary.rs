//! Word lookups: the read-only view of upstream dictionary entries, the
//! client-side lookup state, and (with the `web` feature) the caching proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subset of a dictionary entry the reader displays. Everything else in the
/// upstream payload is passed through untouched by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordData {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phonetic: Option<String>,
    #[serde(default)]
    pub phonetics: Vec<Phonetic>,
    #[serde(default)]
    pub meanings: Vec<Meaning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Phonetic {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meaning {
    pub part_of_speech: String,
    #[serde(default)]
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Definition {
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub antonyms: Vec<String>,
}

impl WordData {
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// First phonetic spelling with text, falling back to the top-level one.
    pub fn pronunciation(&self) -> Option<&str> {
        self.phonetics
            .iter()
            .filter_map(|phonetic| phonetic.text.as_deref())
            .find(|text| !text.is_empty())
            .or(self.phonetic.as_deref())
    }

    /// First playable audio clip, if any.
    pub fn audio_url(&self) -> Option<&str> {
        self.phonetics
            .iter()
            .filter_map(|phonetic| phonetic.audio.as_deref())
            .find(|audio| !audio.is_empty())
    }

    pub fn definition_count(&self) -> usize {
        self.meanings
            .iter()
            .map(|meaning| meaning.definitions.len())
            .sum()
    }
}

/// Lookup keys are trimmed and lower-cased before reaching upstream or cache.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStatus {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
}

/// Client view of the current dictionary lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LookupState {
    pub word: String,
    pub status: LookupStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl LookupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a lookup. Earlier results stay visible until it settles.
    pub fn begin(&mut self, word: impl Into<String>) {
        self.word = word.into();
        self.status = LookupStatus::Loading;
        self.error = None;
    }

    pub fn succeed(&mut self, data: Value) {
        self.status = LookupStatus::Succeeded;
        self.data = Some(data);
        self.error = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = LookupStatus::Failed;
        self.error = Some(message.into());
    }

    pub fn clear(&mut self) {
        self.data = None;
        self.status = LookupStatus::Idle;
        self.error = None;
    }

    pub fn word_data(&self) -> Option<WordData> {
        self.data.as_ref().and_then(WordData::from_value)
    }
}

#[cfg(feature = "web")]
mod proxy {
    use super::normalize_word;
    use lru::LruCache;
    use parking_lot::Mutex;
    use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
    use serde_json::Value;
    use std::num::NonZeroUsize;
    use std::time::Duration;
    use thiserror::Error;
    use tracing::{debug, warn};

    pub const DEFAULT_DICTIONARY_URL: &str = "https://api.dictionaryapi.dev/api/v2/entries/en";
    pub const DEFAULT_CACHE_SIZE: usize = 256;
    const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Debug, Error)]
    pub enum LookupError {
        #[error("word not found")]
        NotFound,
        #[error("dictionary request failed: {0}")]
        Transport(#[from] reqwest::Error),
        #[error("dictionary response was not valid JSON: {0}")]
        Decode(#[source] serde_json::Error),
    }

    /// Forwards lookups to the upstream dictionary and keeps recent hits.
    pub struct DictionaryProxy {
        http: reqwest::Client,
        base_url: String,
        cache: Option<Mutex<LruCache<String, Value>>>,
    }

    impl DictionaryProxy {
        pub fn new(base_url: impl Into<String>, cache_size: usize) -> Result<Self, LookupError> {
            let http = reqwest::Client::builder()
                .timeout(UPSTREAM_TIMEOUT)
                .user_agent(concat!("readmark/", env!("CARGO_PKG_VERSION")))
                .build()?;
            let base_url = base_url.into().trim_end_matches('/').to_string();
            let cache = NonZeroUsize::new(cache_size).map(|cap| Mutex::new(LruCache::new(cap)));
            Ok(Self {
                http,
                base_url,
                cache,
            })
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        /// First upstream entry for `word`, verbatim.
        pub async fn lookup(&self, word: &str) -> Result<Value, LookupError> {
            let key = normalize_word(word);
            if key.is_empty() {
                return Err(LookupError::NotFound);
            }
            if let Some(hit) = self.cached(&key) {
                debug!(word = %key, "dictionary cache hit");
                return Ok(hit);
            }

            let url = format!(
                "{}/{}",
                self.base_url,
                utf8_percent_encode(&key, NON_ALPHANUMERIC)
            );
            let response = self.http.get(&url).send().await.map_err(|err| {
                warn!(error = %err, word = %key, "dictionary upstream unreachable");
                LookupError::Transport(err)
            })?;
            if !response.status().is_success() {
                debug!(word = %key, status = %response.status(), "dictionary upstream miss");
                return Err(LookupError::NotFound);
            }
            let bytes = response.bytes().await?;
            let payload: Value = serde_json::from_slice(&bytes).map_err(|err| {
                warn!(error = %err, word = %key, "dictionary upstream sent malformed JSON");
                LookupError::Decode(err)
            })?;
            let entry = first_entry(payload).ok_or(LookupError::NotFound)?;

            if let Some(cache) = &self.cache {
                cache.lock().put(key, entry.clone());
            }
            Ok(entry)
        }

        fn cached(&self, key: &str) -> Option<Value> {
            self.cache.as_ref()?.lock().get(key).cloned()
        }
    }

    fn first_entry(payload: Value) -> Option<Value> {
        match payload {
            Value::Array(entries) => entries.into_iter().next(),
            _ => None,
        }
    }
}

#[cfg(feature = "web")]
pub use proxy::{DEFAULT_CACHE_SIZE, DEFAULT_DICTIONARY_URL, DictionaryProxy, LookupError};
