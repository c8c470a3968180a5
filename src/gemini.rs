use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WizardError;
use crate::media::ImagePayload;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Fixed instruction sent alongside the property photo. Not user-configurable.
const ANALYSIS_PROMPT: &str = "You are a professional real estate cinematographer. Analyze this house/property image in detail.

Generate a cinematic video prompt that describes a smooth, professional real estate walkthrough video based on what you see. The prompt should:

1. Start with an establishing exterior shot of the property
2. Describe a smooth camera movement approaching the entrance
3. Describe entering through the front door with a fluid transition
4. Detail room-by-room exploration based on what's visible in the image
5. Include descriptions of lighting, textures, architectural details
6. End with a panoramic view or return to exterior

The prompt should be written as a continuous, cinematic description suitable for AI video generation.
Keep the walkthrough feeling natural and flowing.
Write ONLY the video prompt, nothing else. Keep it under 200 words.";

#[derive(Debug, Serialize, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiRequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContentRequest {
    role: String,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiRequestBody {
    contents: Vec<GeminiContentRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPartText {
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContentResponse {
    parts: Option<Vec<GeminiPartText>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiResponseBody {
    candidates: Option<Vec<GeminiCandidate>>,
}

fn build_request(payload: &ImagePayload) -> GeminiRequestBody {
    GeminiRequestBody {
        contents: vec![GeminiContentRequest {
            role: "user".to_string(),
            parts: vec![
                GeminiRequestPart {
                    text: None,
                    inline_data: Some(GeminiInlineData {
                        mime_type: payload.mime_type.clone(),
                        data: payload.data.clone(),
                    }),
                },
                GeminiRequestPart {
                    text: Some(ANALYSIS_PROMPT.to_string()),
                    inline_data: None,
                },
            ],
        }],
    }
}

fn extract_text(body: GeminiResponseBody) -> Option<String> {
    for cand in body.candidates? {
        if let Some(content) = cand.content {
            if let Some(parts) = content.parts {
                for p in parts {
                    if let Some(t) = p.text {
                        if !t.is_empty() {
                            return Some(t);
                        }
                    }
                }
            }
        }
    }
    None
}

/// Seam for the wizard: production code talks to Gemini, tests inject mocks.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, payload: &ImagePayload) -> Result<String, WizardError>;
}

pub struct GeminiAnalyzer {
    api_key: String,
    model: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ImageAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, payload: &ImagePayload) -> Result<String, WizardError> {
        let url = format!("{}/models/{}:generateContent", GEMINI_BASE_URL, self.model);
        let body = build_request(payload);

        let client = reqwest::Client::new();
        let resp = client
            .post(url)
            .header("X-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| WizardError::Analysis(format!("gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(WizardError::Analysis(format!(
                "gemini error: HTTP {}",
                resp.status()
            )));
        }

        let value: GeminiResponseBody = resp
            .json()
            .await
            .map_err(|e| WizardError::Analysis(format!("gemini parse error: {e}")))?;

        extract_text(value)
            .ok_or_else(|| WizardError::Analysis("gemini: no text in response".to_string()))
    }
}
