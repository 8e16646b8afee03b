//! OpenAI-compatible HTTP client for vision analysis and embeddings.
//!
//! Blocking requests with a hard timeout so a hung call can never stall a
//! worker indefinitely. HTTP status codes are mapped onto the
//! [`ServiceError`] taxonomy: 408/429/5xx are transient, every other
//! non-success is permanent.

use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use crate::config::Settings;
use crate::models::PhotoAnalysis;

use super::{EmbeddingClient, ServiceError, VisionAnalyzer};

const VISION_SYSTEM_PROMPT: &str = "\
Du bist ein Assistent, der Fotos von Workshops analysiert.
Analysiere das Foto und extrahiere:
- scene_type: \"flipchart\" (rechteckiges Dokument füllt das Bild), \"group\" \
(Menschen bei Gruppenarbeit), \"activity\" (Aktivität oder Übung), \"result\" \
(Ergebnis oder Produkt) oder \"unknown\"
- description: Kurze prägnante Beschreibung des Bildinhalts auf Deutsch (1-2 Sätze)
- ocr_text: Lesbarer Text auf dem Bild, vollständig extrahiert, sonst null
- topic_keywords: 2-5 thematische Schlagwörter aus dem Bildinhalt
- crop_box: Nur bei scene_type=\"flipchart\" enge Crop-Koordinaten (normalisiert \
0.0-1.0) um das Dokument, sonst null.
Antworte ausschließlich im vorgegebenen JSON-Schema.";

/// Client against an OpenAI-compatible API root.
pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    vision_model: String,
    embedding_model: String,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(settings: &Settings) -> Result<Self, ServiceError> {
        if settings.openai_api_key.is_empty() {
            return Err(ServiceError::Permanent(
                "No API key configured (set FPG_OPENAI_API_KEY)".into(),
            ));
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            api_key: settings.openai_api_key.clone(),
            vision_model: settings.vision_model.clone(),
            embedding_model: settings.embedding_model.clone(),
            timeout_secs: settings.request_timeout_secs,
        })
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        response
            .json()
            .map_err(|e| ServiceError::Permanent(format!("Response parsing failed: {e}")))
    }

    fn classify_transport(&self, error: reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Transient(format!("Request timed out after {}s", self.timeout_secs))
        } else if error.is_connect() {
            ServiceError::Transient(format!("Connection failed: {error}"))
        } else {
            ServiceError::Permanent(format!("Request failed: {error}"))
        }
    }
}

/// 408/429 and server errors are worth retrying; the rest are caller bugs
/// or unsupported inputs and propagate immediately.
fn classify_status(status: u16, body: &str) -> ServiceError {
    let summary = format!("HTTP {status}: {}", snippet(body));
    match status {
        408 | 429 | 500..=599 => ServiceError::Transient(summary),
        _ => ServiceError::Permanent(summary),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Detect the image MIME type from magic bytes. JPEG is the safe default
/// for camera photos.
fn detect_mime(image_bytes: &[u8]) -> &'static str {
    if image_bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if image_bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if image_bytes.starts_with(b"RIFF") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// JSON schema for the structured vision response (strict mode: every
/// property required, no additional properties, nullables via type unions).
fn photo_analysis_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "scene_type": {
                "type": "string",
                "enum": ["flipchart", "group", "activity", "result", "unknown"]
            },
            "description": { "type": "string" },
            "ocr_text": { "type": ["string", "null"] },
            "topic_keywords": {
                "type": "array",
                "items": { "type": "string" }
            },
            "crop_box": {
                "type": ["object", "null"],
                "properties": {
                    "x_min": { "type": "number" },
                    "y_min": { "type": "number" },
                    "x_max": { "type": "number" },
                    "y_max": { "type": "number" }
                },
                "required": ["x_min", "y_min", "x_max", "y_max"],
                "additionalProperties": false
            }
        },
        "required": ["scene_type", "description", "ocr_text", "topic_keywords", "crop_box"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl VisionAnalyzer for OpenAiClient {
    fn analyze_photo(
        &self,
        image_bytes: &[u8],
        detail: &str,
    ) -> Result<PhotoAnalysis, ServiceError> {
        let _span = tracing::info_span!(
            "vision_analyze",
            model = %self.vision_model,
            image_size = image_bytes.len(),
        )
        .entered();

        let b64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let data_url = format!("data:{};base64,{b64}", detect_mime(image_bytes));

        let body = json!({
            "model": self.vision_model,
            "messages": [
                { "role": "system", "content": VISION_SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [{
                        "type": "image_url",
                        "image_url": { "url": data_url, "detail": detail }
                    }]
                }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "photo_analysis",
                    "strict": true,
                    "schema": photo_analysis_schema()
                }
            }
        });

        let raw = self.post("/chat/completions", &body)?;
        let parsed: ChatResponse = serde_json::from_value(raw)
            .map_err(|e| ServiceError::Permanent(format!("Unexpected chat response: {e}")))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ServiceError::Permanent("Chat response has no choices".into()))?;

        serde_json::from_str(content)
            .map_err(|e| ServiceError::Permanent(format!("Vision output violates schema: {e}")))
    }
}

impl EmbeddingClient for OpenAiClient {
    fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let _span = tracing::info_span!(
            "embed_texts",
            model = %self.embedding_model,
            batch_size = texts.len(),
        )
        .entered();

        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let raw = self.post("/embeddings", &body)?;
        let parsed: EmbeddingResponse = serde_json::from_value(raw)
            .map_err(|e| ServiceError::Permanent(format!("Unexpected embedding response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(ServiceError::Permanent(format!(
                "Embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| l2_normalize(d.embedding)).collect())
    }
}

/// L2-normalize so the dot product of two vectors is their cosine
/// similarity regardless of what the service returned.
fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut vec {
            *val /= norm;
        }
    }
    vec
}
