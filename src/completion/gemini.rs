//! Gemini completion service using the `generateContent` API.

use serde::{Deserialize, Serialize};

use super::{sanitize_error_body, CompletionError, CompletionOptions, CompletionService};

/// Default Gemini API base URL.
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Gemini `generateContent` request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    /// Conversation turns. Single-turn here: one user content.
    pub contents: Vec<GeminiContent>,
    /// Generation parameters.
    pub generation_config: GeminiGenerationConfig,
}

/// One conversation turn.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct GeminiContent {
    /// Turn role, "user" for requests.
    pub role: String,
    /// Content parts.
    pub parts: Vec<GeminiRequestPart>,
}

/// A text part of a request turn.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct GeminiRequestPart {
    /// The text content.
    pub text: String,
}

/// Generation parameters in Gemini naming.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

/// Gemini `generateContent` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    /// Generated candidates; absent when the prompt was blocked.
    #[serde(default)]
    pub candidates: Option<Vec<GeminiCandidate>>,
    /// Prompt-level feedback, carries a block verdict when refused.
    #[serde(default)]
    pub prompt_feedback: Option<GeminiPromptFeedback>,
}

/// A generated candidate.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    /// Candidate content; absent when generation stopped before any text.
    #[serde(default)]
    pub content: Option<GeminiCandidateContent>,
    /// Why generation stopped, e.g. "STOP" or "SAFETY".
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The content of a candidate.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GeminiCandidateContent {
    /// Content parts.
    #[serde(default)]
    pub parts: Option<Vec<GeminiResponsePart>>,
}

/// A part of a candidate's content.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GeminiResponsePart {
    /// Text content, absent for non-text parts.
    #[serde(default)]
    pub text: Option<String>,
}

/// Prompt-level feedback.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPromptFeedback {
    /// Block verdict, e.g. "SAFETY", when the prompt was refused.
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Gemini structured error payload.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GeminiErrorEnvelope {
    /// The error body.
    pub error: GeminiErrorBody,
}

/// The body of a Gemini structured error.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GeminiErrorBody {
    /// Human-readable error description.
    pub message: String,
    /// Canonical status name, e.g. "INVALID_ARGUMENT".
    #[serde(default)]
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Gemini `generateContent` completion service.
#[derive(Clone)]
pub struct GeminiService {
    /// Model name in the request path, e.g. "gemini-2.0-flash".
    #[doc(hidden)]
    pub model: String,
    /// Base URL for the Gemini API.
    #[doc(hidden)]
    pub base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiService {
    /// Create a Gemini service for a model and API key.
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            base_url: DEFAULT_GEMINI_URL.to_owned(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

impl std::fmt::Debug for GeminiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiService")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"__REDACTED__")
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a Gemini API request from a prompt and options.
#[doc(hidden)]
pub fn build_request(prompt: &str, options: &CompletionOptions) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_owned(),
            parts: vec![GeminiRequestPart {
                text: prompt.to_owned(),
            }],
        }],
        generation_config: GeminiGenerationConfig {
            temperature: options.temperature,
            top_p: options.top_p,
            max_output_tokens: options.max_output_tokens,
        },
    }
}

/// Extract the response text from a success body.
///
/// # Errors
///
/// Returns `CompletionError::Service` when the prompt was blocked or the
/// candidate stopped for a policy reason, `CompletionError::Malformed`
/// when the body does not carry the expected text.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<String, CompletionError> {
    let resp: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::Malformed(format!("response deserialize failed: {e}")))?;

    if let Some(feedback) = resp.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            return Err(CompletionError::Service(format!("prompt blocked: {reason}")));
        }
    }

    let candidate = resp
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::Malformed("no candidates in response".to_owned()))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        // Policy stops carry no usable text, even with a 200 status.
        if matches!(reason, "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT") {
            return Err(CompletionError::Service(format!(
                "generation stopped: {reason}"
            )));
        }
    }

    let text: String = candidate
        .content
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    if text.is_empty() {
        return Err(CompletionError::Malformed(
            "no text parts in first candidate".to_owned(),
        ));
    }
    Ok(text)
}

/// Classify a non-success HTTP response.
///
/// Gemini reports most failures as a structured `{"error": ...}` payload;
/// those become `Service` errors. Anything else stays an `HttpStatus`
/// with a sanitized body.
#[doc(hidden)]
pub fn classify_status_failure(status: u16, body: &str) -> CompletionError {
    if let Ok(envelope) = serde_json::from_str::<GeminiErrorEnvelope>(body) {
        let api_status = envelope
            .error
            .status
            .unwrap_or_else(|| format!("HTTP_{status}"));
        return CompletionError::Service(format!(
            "{api_status}: {}",
            sanitize_error_body(&envelope.error.message)
        ));
    }
    CompletionError::HttpStatus {
        status,
        body: sanitize_error_body(body),
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl CompletionService for GeminiService {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let api_request = build_request(prompt, options);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let call = async {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", self.api_key.as_str())
                .header("content-type", "application/json")
                .json(&api_request)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(classify_status_failure(status.as_u16(), &body));
            }
            Ok(body)
        };

        let body = tokio::time::timeout(options.timeout, call)
            .await
            .map_err(|_| CompletionError::Timeout {
                after: options.timeout,
            })??;

        parse_response(&body)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
