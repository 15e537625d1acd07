//! Gemini-style generative language client
//!
//! Analysis and rephrase requests ask for a JSON answer; speech requests ask
//! for an audio modality and return inline base64 PCM16.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompt;
use super::retry::is_quota_exhausted;
use super::types::{
    Analysis, ContextTurn, RawAnalysis, RawReply, RephraseStyle, TutorParams, TutorReply,
};
use super::TutorService;
use crate::config::Config;
use crate::voice::Clip;
use crate::{Error, Result};

/// Which kind of request failed, for error mapping
#[derive(Debug, Clone, Copy)]
enum Call {
    Analysis,
    Speech,
}

/// HTTP client for the generative language API
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    analysis_model: String,
    tts_model: String,
}

impl GeminiClient {
    /// Create a client from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config.base_url.clone(),
            analysis_model: config.analysis_model.clone(),
            tts_model: config.tts_model.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    async fn generate(
        &self,
        model: &str,
        body: &GenerateRequest,
        call: Call,
    ) -> Result<GenerateResponse> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_failure(status.as_u16(), &body, call));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TutorService for GeminiClient {
    async fn analyze(
        &self,
        clip: &Clip,
        context: &[ContextTurn],
        params: &TutorParams,
    ) -> Result<Analysis> {
        let request = GenerateRequest {
            system_instruction: Some(Content::text(None, prompt::system_instruction(params))),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::text(prompt::analysis_request(context)),
                    Part::inline(Clip::MIME_TYPE, clip.to_base64()),
                ],
            }],
            generation_config: json!({ "responseMimeType": "application/json" }),
        };

        tracing::debug!(
            model = %self.analysis_model,
            context_turns = context.len(),
            clip_bytes = clip.wav.len(),
            "sending analysis request"
        );
        let response = self
            .generate(&self.analysis_model, &request, Call::Analysis)
            .await?;
        let text = response
            .first_text()
            .ok_or_else(|| Error::Tutor("analysis response has no text".to_string()))?;

        let raw: RawAnalysis = serde_json::from_str(strip_code_fence(&text))?;
        Analysis::try_from(raw)
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<String> {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content::text(Some("user"), text.to_string())],
            generation_config: json!({
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }),
        };

        tracing::debug!(model = %self.tts_model, voice, chars = text.len(), "synthesizing speech");
        let response = self.generate(&self.tts_model, &request, Call::Speech).await?;
        response
            .first_audio()
            .ok_or_else(|| Error::Tts("speech response has no audio".to_string()))
    }

    async fn rephrase(
        &self,
        text: &str,
        style: RephraseStyle,
        params: &TutorParams,
    ) -> Result<TutorReply> {
        let request = GenerateRequest {
            system_instruction: Some(Content::text(None, prompt::system_instruction(params))),
            contents: vec![Content::text(
                Some("user"),
                prompt::rephrase_request(text, style),
            )],
            generation_config: json!({ "responseMimeType": "application/json" }),
        };

        tracing::debug!(style = style.as_str(), "sending rephrase request");
        let response = self
            .generate(&self.analysis_model, &request, Call::Analysis)
            .await?;
        let text = response
            .first_text()
            .ok_or_else(|| Error::Tutor("rephrase response has no text".to_string()))?;

        let raw: RawReply = serde_json::from_str(strip_code_fence(&text))?;
        TutorReply::try_from(raw)
    }
}

/// Map a non-success response onto the error taxonomy
fn map_failure(status: u16, body: &str, call: Call) -> Error {
    if is_quota_exhausted(status, body) {
        return Error::QuotaExhausted(format!("{status}: {body}"));
    }
    match call {
        Call::Analysis => Error::Tutor(format!("API error {status}: {body}")),
        Call::Speech => Error::Tts(format!("API error {status}: {body}")),
    }
}

/// Drop a surrounding Markdown code fence, if any
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// -- Wire format --------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: String) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline(mime_type: &str, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .flat_map(|c| c.content.parts.iter())
    }

    /// Concatenated text of the first candidate's text parts
    fn first_text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        (!text.trim().is_empty()).then_some(text)
    }

    /// Base64 data of the first inline audio part
    fn first_audio(&self) -> Option<String> {
        self.parts()
            .filter_map(|p| p.inline_data.as_ref())
            .find(|d| !d.data.is_empty())
            .map(|d| d.data.clone())
    }
}
