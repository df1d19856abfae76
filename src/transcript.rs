use std::future::Future;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use ytranscript::{
    TranscriptConfig, TranscriptResponse, YoutubeTranscript, YoutubeTranscriptError,
};

use crate::formatter::{clean_caption_text, join_segment_texts};
use crate::language::select_available;

/// One timed caption line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(rename = "start")]
    pub start_seconds: f64,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
}

impl TranscriptSegment {
    /// Negative or NaN timings are clamped to zero.
    pub fn new(text: impl Into<String>, start_seconds: f64, duration_seconds: f64) -> Self {
        Self {
            text: text.into(),
            start_seconds: non_negative(start_seconds),
            duration_seconds: non_negative(duration_seconds),
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}

/// A transcript in a single language. Fields are private so `full_text`
/// always matches `segments`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    video_id: String,
    full_text: String,
    language_used: String,
    segments: Vec<TranscriptSegment>,
}

impl TranscriptResult {
    pub fn new(
        video_id: impl Into<String>,
        language_used: impl Into<String>,
        mut segments: Vec<TranscriptSegment>,
    ) -> Self {
        segments.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));
        let full_text = join_segment_texts(segments.iter().map(|s| s.text.as_str()));
        Self {
            video_id: video_id.into(),
            full_text,
            language_used: language_used.into(),
            segments,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn language_used(&self) -> &str {
        &self.language_used
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }
}

/// Classified upstream failure. `Clone` so a single failed fetch can be
/// handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("no transcript available in any candidate language")]
    NoTranscript,
    #[error("video is unavailable")]
    VideoUnavailable,
    #[error("upstream is rate limiting requests")]
    RateLimited,
    #[error("upstream rejected the video id")]
    InvalidVideoId,
    #[error("unclassified upstream failure: {0}")]
    Unknown(String),
}

/// Source of transcripts. Implementations try `languages` in order and
/// return the first usable transcript.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(
        &self,
        video_id: &str,
        languages: &[String],
    ) -> Result<TranscriptResult, UpstreamError>;
}

/// [`UpstreamClient`] backed by YouTube's public caption tracks.
#[derive(Debug, Clone, Default)]
pub struct YtTranscriptClient {
    accept_any_language: bool,
}

impl YtTranscriptClient {
    /// With `accept_any_language` set, a video that has captions but none in
    /// the requested languages is served in whatever language it does have.
    pub fn new(accept_any_language: bool) -> Self {
        Self {
            accept_any_language,
        }
    }

    async fn fetch_language(
        video_id: String,
        lang: String,
    ) -> Result<Vec<TranscriptResponse>, YoutubeTranscriptError> {
        let config = TranscriptConfig { lang: Some(lang) };
        YoutubeTranscript::fetch_transcript(&video_id, Some(config)).await
    }
}

#[async_trait]
impl UpstreamClient for YtTranscriptClient {
    async fn fetch(
        &self,
        video_id: &str,
        languages: &[String],
    ) -> Result<TranscriptResult, UpstreamError> {
        let owned_id = video_id.to_string();
        fetch_first_available(video_id, languages, self.accept_any_language, |lang| {
            Self::fetch_language(owned_id.clone(), lang)
        })
        .await
    }
}

/// Tries `languages` in order through `fetch_language`. A missing language
/// moves on to the next candidate; any other failure ends the search. With
/// `accept_any_language`, a video with none of the candidates is served in
/// the first track it does have.
async fn fetch_first_available<F, Fut>(
    video_id: &str,
    languages: &[String],
    accept_any_language: bool,
    fetch_language: F,
) -> Result<TranscriptResult, UpstreamError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<TranscriptResponse>, YoutubeTranscriptError>>,
{
    let mut available_langs: Vec<String> = Vec::new();

    for lang in languages {
        match fetch_language(lang.clone()).await {
            Ok(entries) => return build_result(video_id, lang, entries),
            Err(YoutubeTranscriptError::TranscriptNotAvailableLanguage(_, available, _)) => {
                log::debug!("Video {video_id} has no '{lang}' track, available: {available:?}");
                available_langs = available;
            }
            Err(e) => return Err(classify(e)),
        }
    }

    if accept_any_language {
        if let Some(fallback_lang) = select_available(&available_langs, languages) {
            log::info!(
                "Video {video_id} has none of {languages:?}, falling back to '{fallback_lang}'"
            );
            let entries = fetch_language(fallback_lang.clone())
                .await
                .map_err(classify)?;
            return build_result(video_id, &fallback_lang, entries);
        }
    }

    Err(UpstreamError::NoTranscript)
}

fn build_result(
    video_id: &str,
    lang: &str,
    entries: Vec<TranscriptResponse>,
) -> Result<TranscriptResult, UpstreamError> {
    if entries.is_empty() {
        return Err(UpstreamError::NoTranscript);
    }
    let segments = entries
        .into_iter()
        .map(|entry| {
            TranscriptSegment::new(
                clean_caption_text(&entry.text),
                f64::from(entry.offset),
                f64::from(entry.duration),
            )
        })
        .collect();
    Ok(TranscriptResult::new(video_id, lang, segments))
}

fn classify(error: YoutubeTranscriptError) -> UpstreamError {
    match error {
        YoutubeTranscriptError::TooManyRequests => UpstreamError::RateLimited,
        YoutubeTranscriptError::VideoUnavailable(_) => UpstreamError::VideoUnavailable,
        YoutubeTranscriptError::TranscriptDisabled(_)
        | YoutubeTranscriptError::TranscriptNotAvailable(_)
        | YoutubeTranscriptError::TranscriptNotAvailableLanguage(..) => {
            UpstreamError::NoTranscript
        }
        YoutubeTranscriptError::InvalidVideoId => UpstreamError::InvalidVideoId,
    }
}
