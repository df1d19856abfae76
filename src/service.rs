use std::sync::Arc;

use serde::Serialize;

use crate::cache::{CacheKey, TranscriptCache};
use crate::error::ResolveError;
use crate::language::{is_valid_language_tag, FallbackResolver};
use crate::transcript::{TranscriptResult, TranscriptSegment, UpstreamClient};

/// YouTube video ids are always this long.
const VIDEO_ID_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Text,
    #[default]
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("text") {
            Ok(OutputFormat::Text)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(OutputFormat::Json)
        } else {
            Err(ResolveError::InvalidRequest(format!(
                "unsupported format '{s}'"
            )))
        }
    }
}

/// A validated transcript lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRequest {
    video_id: String,
    preferred_language: Option<String>,
    output_format: OutputFormat,
}

impl TranscriptRequest {
    /// Builds a request from raw transport values. A missing format means
    /// JSON and a blank language means no preference.
    pub fn parse(
        video_id: &str,
        lang: Option<&str>,
        format: Option<&str>,
    ) -> Result<Self, ResolveError> {
        let video_id = video_id.trim();
        if !is_valid_video_id(video_id) {
            return Err(ResolveError::InvalidRequest(format!(
                "malformed video id '{video_id}'"
            )));
        }
        let output_format = match format {
            Some(format) => format.trim().parse::<OutputFormat>()?,
            None => OutputFormat::default(),
        };
        let preferred_language = match lang.map(str::trim).filter(|lang| !lang.is_empty()) {
            Some(lang) if is_valid_language_tag(lang) => Some(lang.to_string()),
            Some(lang) => {
                return Err(ResolveError::InvalidRequest(format!(
                    "malformed language tag {lang:?}"
                )))
            }
            None => None,
        };

        Ok(Self {
            video_id: video_id.to_string(),
            preferred_language,
            output_format,
        })
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn preferred_language(&self) -> Option<&str> {
        self.preferred_language.as_deref()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }
}

fn is_valid_video_id(video_id: &str) -> bool {
    video_id.len() == VIDEO_ID_LEN
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A transcript shaped for the requested output format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptResponse {
    pub video_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<TranscriptSegment>>,
}

impl TranscriptResponse {
    pub fn shape(transcript: &TranscriptResult, format: OutputFormat) -> Self {
        let mut response = Self {
            video_id: transcript.video_id().to_string(),
            text: transcript.full_text().to_string(),
            language_used: None,
            segments: None,
        };
        if format == OutputFormat::Json {
            response.language_used = Some(transcript.language_used().to_string());
            response.segments = Some(transcript.segments().to_vec());
        }
        response
    }
}

/// Answers transcript lookups through the shared cache, going upstream at
/// most once per key at a time. Failed lookups are not retried here.
#[derive(Clone)]
pub struct ResolutionService {
    resolver: FallbackResolver,
    cache: Arc<TranscriptCache>,
    upstream: Arc<dyn UpstreamClient>,
}

impl ResolutionService {
    pub fn new(
        resolver: FallbackResolver,
        cache: Arc<TranscriptCache>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            resolver,
            cache,
            upstream,
        }
    }

    pub fn cache(&self) -> &Arc<TranscriptCache> {
        &self.cache
    }

    fn cache_key(&self, request: &TranscriptRequest) -> Result<CacheKey, ResolveError> {
        let candidates = self
            .resolver
            .resolve_candidates(request.preferred_language());
        Ok(CacheKey::new(request.video_id(), candidates)?)
    }

    /// Drops the cached transcript the request would be served from.
    /// Returns whether there was one.
    pub fn invalidate(&self, request: &TranscriptRequest) -> Result<bool, ResolveError> {
        let key = self.cache_key(request)?;
        Ok(self.cache.invalidate(&key))
    }

    pub async fn resolve(
        &self,
        request: &TranscriptRequest,
    ) -> Result<TranscriptResponse, ResolveError> {
        let key = self.cache_key(request)?;
        let candidates = key.languages().to_vec();

        let upstream = Arc::clone(&self.upstream);
        let video_id = request.video_id().to_string();
        let transcript = self
            .cache
            .get_or_fetch(&key, move || async move {
                log::info!(
                    "Fetching transcript for video {video_id} with languages {candidates:?}"
                );
                upstream.fetch(&video_id, &candidates).await
            })
            .await?;

        log::debug!(
            "Resolved {key} in '{}' ({} segments)",
            transcript.language_used(),
            transcript.segments().len()
        );
        Ok(TranscriptResponse::shape(&transcript, request.output_format()))
    }
}
