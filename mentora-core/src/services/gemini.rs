//! `generateContent` REST client for the text and resume collaborators.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    resume_prompt, GeneratedText, GroundingLink, ResumeAnalysis, ResumeAnalyzer, TextGenerator,
};
use crate::error::{MentoraError, Result};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GeminiClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(MentoraError::Service("no API key configured".into()));
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MentoraError::Service(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_TEXT_MODEL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn post(&self, body: &Value) -> Result<GenerateResponse> {
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .map_err(|e| MentoraError::Service(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, "generateContent returned non-success status");
            return Err(MentoraError::Service(format!(
                "generateContent returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json::<GenerateResponse>()
            .map_err(|e| MentoraError::Service(format!("unreadable response: {e}")))
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str, use_search: bool) -> Result<GeneratedText> {
        info!(model = %self.model, use_search, "generating text");
        let response = self.post(&text_request(prompt, use_search))?;
        Ok(generated_text(response))
    }
}

impl ResumeAnalyzer for GeminiClient {
    fn analyze(&self, resume_text: &str) -> Result<ResumeAnalysis> {
        info!(model = %self.model, chars = resume_text.len(), "analyzing resume");
        let response = self.post(&resume_request(resume_text))?;
        parse_resume_analysis(&response.text())
    }
}

// ── Request bodies ───────────────────────────────────────────────────────────

fn user_content(text: &str) -> Value {
    json!([{ "role": "user", "parts": [{ "text": text }] }])
}

pub(crate) fn text_request(prompt: &str, use_search: bool) -> Value {
    let mut body = json!({ "contents": user_content(prompt) });
    if use_search {
        body["tools"] = json!([{ "googleSearch": {} }]);
    }
    body
}

pub(crate) fn resume_request(resume_text: &str) -> Value {
    let string_list = json!({ "type": "ARRAY", "items": { "type": "STRING" } });
    json!({
        "contents": user_content(&resume_prompt(resume_text)),
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "score": { "type": "NUMBER" },
                    "suggestions": string_list,
                    "missingSkills": string_list,
                    "roadmapNodes": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "id": { "type": "STRING" },
                                "title": { "type": "STRING" },
                                "desc": { "type": "STRING" }
                            }
                        }
                    }
                }
            }
        }
    })
}

// ── Response parsing ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GroundingMetadata {
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebSource {
    uri: String,
    title: String,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn grounding(&self) -> Vec<GroundingLink> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|meta| {
                meta.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref())
                    .filter(|web| !web.uri.is_empty())
                    .map(|web| GroundingLink {
                        title: if web.title.is_empty() {
                            web.uri.clone()
                        } else {
                            web.title.clone()
                        },
                        uri: web.uri.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) fn generated_text(response: GenerateResponse) -> GeneratedText {
    let grounding = response.grounding();
    debug!(sources = grounding.len(), "text generated");
    GeneratedText {
        text: response.text(),
        grounding,
    }
}

/// Parse the model's JSON answer. An empty answer yields an empty analysis;
/// the score is clamped into [0, 100].
pub fn parse_resume_analysis(text: &str) -> Result<ResumeAnalysis> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(ResumeAnalysis::default());
    }
    let mut analysis: ResumeAnalysis = serde_json::from_str(trimmed)
        .map_err(|e| MentoraError::Service(format!("resume analysis was not valid JSON: {e}")))?;
    analysis.score = analysis.score.clamp(0.0, 100.0);
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_adds_google_search_tool() {
        let body = text_request("jobs in Pune", true);
        assert_eq!(body["tools"][0]["googleSearch"], json!({}));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "jobs in Pune");

        let plain = text_request("hi", false);
        assert!(plain.get("tools").is_none());
    }

    #[test]
    fn resume_request_asks_for_json_schema() {
        let body = resume_request("Skills: Rust");
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(
            config["responseSchema"]["properties"]["missingSkills"]["items"]["type"],
            "STRING"
        );
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.ends_with("Skills: Rust"));
    }

    #[test]
    fn extracts_text_and_web_grounding() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Try " }, { "text": "Rust." }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://a.test", "title": "A" } },
                        { "web": { "uri": "https://b.test" } },
                        { "retrievedContext": {} }
                    ]
                }
            }]
        }))
        .unwrap();

        let generated = generated_text(response);
        assert_eq!(generated.text, "Try Rust.");
        assert_eq!(
            generated.grounding,
            vec![
                GroundingLink {
                    title: "A".into(),
                    uri: "https://a.test".into()
                },
                GroundingLink {
                    title: "https://b.test".into(),
                    uri: "https://b.test".into()
                },
            ]
        );
    }

    #[test]
    fn empty_response_has_no_text() {
        let generated = generated_text(GenerateResponse::default());
        assert!(generated.text.is_empty());
        assert!(generated.grounding.is_empty());
    }

    #[test]
    fn parses_and_clamps_resume_analysis() {
        let analysis = parse_resume_analysis(
            r#"{"score": 140, "suggestions": ["Add metrics"],
                "roadmapNodes": [{"id": "1", "title": "Docker", "desc": "Containers"}]}"#,
        )
        .unwrap();
        assert_eq!(analysis.score, 100.0);
        assert_eq!(analysis.suggestions, vec!["Add metrics".to_string()]);
        assert_eq!(analysis.roadmap_nodes[0].title, "Docker");

        assert_eq!(parse_resume_analysis("  ").unwrap(), ResumeAnalysis::default());
        assert!(matches!(
            parse_resume_analysis("not json"),
            Err(MentoraError::Service(_))
        ));
    }

    #[test]
    fn client_requires_key() {
        assert!(GeminiClient::new("").is_err());
        let client = GeminiClient::new("k")
            .unwrap()
            .with_base_url("http://localhost:9/v1beta/")
            .with_model("m");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9/v1beta/models/m:generateContent"
        );
        assert!(!format!("{client:?}").contains("\"k\""));
    }
}
