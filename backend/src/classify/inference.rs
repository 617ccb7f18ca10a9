use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{BinColor, ClassificationResult};
use std::str::FromStr;
use url::Url;

use super::request::ClassificationRequest;
use super::ClassifyError;
use crate::config::InferenceConfig;

pub const CLASSIFICATION_PROMPT: &str = "Analyze this image of a waste item.\n\n\
Is the waste item 'Recyclable' (Blue Bin), 'Organic' (Green Bin), or 'Hazardous/Reject' (Red Bin)?\n\n\
Return ONLY the bin color and a 1-sentence eco-fact.";

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult, ClassifyError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: Value,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Output schema declared to the model; the bin field is restricted to three tokens.
fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "binColor": {
                "type": "STRING",
                "enum": ["Red", "Blue", "Green"],
                "description": "The recommended bin color for the waste item."
            },
            "ecoFact": {
                "type": "STRING",
                "description": "A short eco-fact related to waste disposal."
            }
        },
        "required": ["binColor", "ecoFact"]
    })
}

/// Validates raw model output against the declared schema.
pub fn validate_model_output(text: &str) -> Result<ClassificationResult, ClassifyError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ClassifyError::InferenceContractViolation("empty model output".into()));
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| ClassifyError::InferenceContractViolation(format!("output is not JSON: {}", e)))?;

    let bin_token = value
        .get("binColor")
        .and_then(Value::as_str)
        .ok_or_else(|| ClassifyError::InferenceContractViolation("missing binColor".into()))?;
    let bin_color = BinColor::from_str(bin_token).map_err(|_| {
        ClassifyError::InferenceContractViolation(format!("binColor '{}' is not Red, Blue or Green", bin_token))
    })?;

    let eco_fact = value
        .get("ecoFact")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|fact| !fact.is_empty())
        .ok_or_else(|| ClassifyError::InferenceContractViolation("missing ecoFact".into()))?;

    Ok(ClassificationResult {
        bin_color,
        eco_fact: eco_fact.to_string(),
    })
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http_client: HttpClient,
    endpoint: Url,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, ClassifyError> {
        let endpoint = Url::parse(&config.base_url)
            .and_then(|base| base.join(&format!("v1beta/models/{}:generateContent", config.model)))
            .map_err(|e| ClassifyError::InferenceUnavailable(format!("invalid inference endpoint: {}", e)))?;

        let http_client = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifyError::InferenceUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    fn build_body<'a>(request: &'a ClassificationRequest) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: CLASSIFICATION_PROMPT,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: request.mime_type(),
                            data: request.payload(),
                        },
                    },
                ],
            }],
            generation_config: json!({
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            }),
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult, ClassifyError> {
        log::debug!("Sending classification request ({} payload bytes)", request.payload().len());

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| ClassifyError::InferenceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClassifyError::InferenceUnavailable(format!(
                "model returned {}: {}",
                status, error_text
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::InferenceContractViolation(format!("unreadable response: {}", e)))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();

        validate_model_output(&text)
    }
}
