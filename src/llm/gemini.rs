use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::config::{Config, SafetyProfile};
use crate::llm::generator::{GenerationError, GenerationRequest, ImageGenerator};
use crate::llm::media::{ImageData, MediaType};
use crate::utils::http::get_http_client;
use crate::utils::timing::timed_model_call;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const LOG_PREVIEW_CHARS: usize = 200;
const LOG_BODY_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

impl GeminiResponse {
    fn parts(&self) -> impl Iterator<Item = &GeminiPart> {
        self.candidates
            .iter()
            .flatten()
            .filter_map(|candidate| candidate.content.as_ref()?.parts.as_ref())
            .flatten()
    }
}

/// Client for Gemini's `generateContent` endpoint, restricted to image output.
#[derive(Debug, Clone)]
pub struct GeminiImageClient {
    api_key: String,
    api_base: String,
    model: String,
    safety: SafetyProfile,
    timeout: Duration,
}

impl GeminiImageClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        safety: SafetyProfile,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: api_base.into(),
            model: model.into(),
            safety,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gemini_api_key.clone(),
            config.gemini_api_base.clone(),
            config.gemini_image_model.clone(),
            config.gemini_safety,
            config.generation_timeout(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_generate_content(&self, payload: &Value) -> Result<GeminiResponse> {
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        let response = get_http_client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                let (timeout, connect) = (err.is_timeout(), err.is_connect());
                anyhow!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    err.without_url(),
                    timeout,
                    connect
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: "llm.gemini",
                status = %status,
                body = %preview(body.trim(), LOG_BODY_CHARS),
                "Gemini API error"
            );
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                api_error_message(&body)
            ));
        }

        response
            .json::<GeminiResponse>()
            .await
            .context("Gemini response was not valid JSON")
    }
}

impl ImageGenerator for GeminiImageClient {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<ImageData, GenerationError>> + Send {
        async move {
            let payload = build_payload(&request, self.safety);
            debug!(
                target: "llm.gemini",
                model = %self.model,
                request = %RequestSummary::of(&request),
                "Sending image request"
            );

            let metadata = json!({
                "label": request.label,
                "attachments": request.attachments.len(),
            });
            let response = timed_model_call(
                "gemini",
                &self.model,
                "generate_image",
                Some(metadata),
                || self.post_generate_content(&payload),
            )
            .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    error!(
                        model = %self.model,
                        label = %request.label,
                        "Image generation failed: {:#}",
                        err
                    );
                    return Err(GenerationError::GenerationFailed(request.label));
                }
            };

            let summary = ResponseSummary::of(&response);
            debug!(target: "llm.gemini", model = %self.model, response = %summary);
            extract_first_image(&response).ok_or_else(|| {
                warn!(
                    model = %self.model,
                    label = %request.label,
                    "Gemini response contained no image: {}",
                    summary
                );
                GenerationError::NoImageInResponse
            })
        }
    }
}

fn build_safety_settings(profile: SafetyProfile) -> Vec<Value> {
    let threshold = profile.threshold();
    HARM_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": threshold }))
        .collect()
}

fn inline_image_part(image: &ImageData) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.media_type().as_mime(),
            "data": general_purpose::STANDARD.encode(image.bytes()),
        }
    })
}

/// Source image, then attachments in order, then the instruction text.
fn build_payload(request: &GenerationRequest, safety: SafetyProfile) -> Value {
    let mut parts: Vec<Value> = request.images().map(inline_image_part).collect();
    parts.push(json!({ "text": request.instruction }));
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseModalities": ["IMAGE"] },
        "safetySettings": build_safety_settings(safety),
    })
}

fn decode_inline_image(inline_data: &GeminiInlineData) -> Option<ImageData> {
    let bytes = match general_purpose::STANDARD.decode(inline_data.data.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Skipping undecodable inline image part: {}", err);
            return None;
        }
    };
    let Some(media_type) =
        MediaType::from_mime(&inline_data.mime_type).or_else(|| MediaType::sniff(&bytes))
    else {
        warn!(
            "Skipping inline part with unsupported mime type {}",
            inline_data.mime_type
        );
        return None;
    };
    Some(ImageData::new(bytes, media_type))
}

fn extract_first_image(response: &GeminiResponse) -> Option<ImageData> {
    response.parts().find_map(|part| match part {
        GeminiPart::InlineData { inline_data } => decode_inline_image(inline_data),
        _ => None,
    })
}

fn preview(value: &str, limit: usize) -> String {
    let mut chars = value.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}... (truncated)")
    } else {
        head
    }
}

/// `error.message` from a Gemini error body, or a preview of the raw body.
fn api_error_message(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "empty response body".to_string();
    }
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| preview(body, LOG_BODY_CHARS))
}

/// Loggable shape of a request without the image payloads.
struct RequestSummary<'a> {
    label: &'a str,
    images: Vec<(&'static str, usize)>,
    instruction: String,
}

impl<'a> RequestSummary<'a> {
    fn of(request: &'a GenerationRequest) -> Self {
        Self {
            label: &request.label,
            images: request
                .images()
                .map(|image| (image.media_type().as_mime(), image.len()))
                .collect(),
            instruction: preview(&request.instruction, LOG_PREVIEW_CHARS),
        }
    }
}

impl fmt::Display for RequestSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label={:?} images=[", self.label)?;
        for (index, (mime, bytes)) in self.images.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{mime} {bytes}B")?;
        }
        write!(f, "] instruction={:?}", self.instruction)
    }
}

#[derive(Default)]
struct ResponseSummary {
    candidates: usize,
    text_parts: usize,
    image_parts: usize,
    other_parts: usize,
    /// Field names of parts that are neither text nor inline data.
    other_keys: Vec<String>,
    text_preview: Option<String>,
    finish_reasons: Vec<String>,
    prompt_feedback: Option<Value>,
}

impl ResponseSummary {
    fn of(response: &GeminiResponse) -> Self {
        let candidates = response.candidates.as_deref().unwrap_or_default();
        let mut summary = ResponseSummary {
            candidates: candidates.len(),
            finish_reasons: candidates
                .iter()
                .filter_map(|candidate| candidate.finish_reason.clone())
                .collect(),
            prompt_feedback: response.prompt_feedback.clone(),
            ..ResponseSummary::default()
        };
        for part in response.parts() {
            match part {
                GeminiPart::Text { text } => {
                    summary.text_parts += 1;
                    if summary.text_preview.is_none() && !text.trim().is_empty() {
                        summary.text_preview = Some(preview(text, LOG_PREVIEW_CHARS));
                    }
                }
                GeminiPart::InlineData { .. } => summary.image_parts += 1,
                GeminiPart::Other(value) => {
                    summary.other_parts += 1;
                    let keys = value.as_object().into_iter().flat_map(|object| object.keys());
                    for key in keys {
                        if !summary.other_keys.contains(key) {
                            summary.other_keys.push(key.clone());
                        }
                    }
                }
            }
        }
        summary
    }
}

impl fmt::Display for ResponseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidates={} parts(text={} image={} other={}",
            self.candidates, self.text_parts, self.image_parts, self.other_parts
        )?;
        if !self.other_keys.is_empty() {
            write!(f, " [{}]", self.other_keys.join(", "))?;
        }
        f.write_str(")")?;
        if !self.finish_reasons.is_empty() {
            write!(f, " finish={}", self.finish_reasons.join(","))?;
        }
        if let Some(text) = &self.text_preview {
            write!(f, " text={text:?}")?;
        }
        if let Some(feedback) = &self.prompt_feedback {
            write!(f, " feedback={feedback}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::media::fixtures;

    fn parse(value: Value) -> GeminiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parts_put_source_first_then_attachments_then_text() {
        let source = fixtures::jpeg(1);
        let background = fixtures::png(2);
        let clothing = fixtures::png(3);
        let request = GenerationRequest::new(
            "smile",
            source.clone(),
            "make them smile",
            vec![background.clone(), clothing.clone()],
        );

        let payload = build_payload(&request, SafetyProfile::Permissive);
        let parts = payload
            .pointer("/contents/0/parts")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(parts.len(), 4);

        let expected = [&source, &background, &clothing];
        for (part, image) in parts.iter().zip(expected) {
            assert_eq!(
                part.pointer("/inlineData/mimeType").and_then(Value::as_str),
                Some(image.media_type().as_mime())
            );
            let data = part.pointer("/inlineData/data").and_then(Value::as_str).unwrap();
            assert_eq!(general_purpose::STANDARD.decode(data).unwrap(), image.bytes());
        }
        assert_eq!(parts[3]["text"], "make them smile");
    }

    #[test]
    fn requests_image_only_output() {
        let request = GenerationRequest::restoration(fixtures::png(9));
        let payload = build_payload(&request, SafetyProfile::Standard);
        assert_eq!(
            payload.pointer("/generationConfig/responseModalities"),
            Some(&json!(["IMAGE"]))
        );
        let safety = payload["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), HARM_CATEGORIES.len());
        assert!(safety
            .iter()
            .all(|setting| setting["threshold"] == "BLOCK_MEDIUM_AND_ABOVE"));
        assert_eq!(build_safety_settings(SafetyProfile::Permissive)[0]["threshold"], "OFF");
    }

    #[test]
    fn first_image_part_is_extracted_after_text() {
        let first = fixtures::png(20);
        let second = fixtures::png(40);
        let response = parse(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here you go" },
                    { "thoughtSignature": "abc" },
                    { "inlineData": { "mimeType": "image/png", "data": "@@not base64@@" } },
                    { "inlineData": {
                        "mimeType": "image/png",
                        "data": general_purpose::STANDARD.encode(first.bytes())
                    }},
                    { "inlineData": {
                        "mimeType": "image/png",
                        "data": general_purpose::STANDARD.encode(second.bytes())
                    }}
                ]},
                "finishReason": "STOP"
            }]
        }));

        assert_eq!(extract_first_image(&response), Some(first));
        let summary = ResponseSummary::of(&response);
        assert_eq!(summary.text_parts, 1);
        assert_eq!(summary.other_parts, 1);
        assert_eq!(summary.image_parts, 3);
        assert_eq!(summary.finish_reasons, vec!["STOP".to_string()]);
        assert_eq!(summary.other_keys, vec!["thoughtSignature".to_string()]);
        assert_eq!(
            summary.to_string(),
            r#"candidates=1 parts(text=1 image=3 other=1 [thoughtSignature]) finish=STOP text="Here you go""#
        );
    }

    #[test]
    fn text_only_response_has_no_image() {
        let response = parse(json!({
            "candidates": [{ "content": { "parts": [{ "text": "I cannot do that." }] } }]
        }));
        assert!(extract_first_image(&response).is_none());
        assert_eq!(
            ResponseSummary::of(&response).text_preview.as_deref(),
            Some("I cannot do that.")
        );

        let blocked = parse(json!({ "promptFeedback": { "blockReason": "SAFETY" } }));
        assert!(extract_first_image(&blocked).is_none());
        let summary = ResponseSummary::of(&blocked);
        assert_eq!(summary.candidates, 0);
        assert_eq!(
            summary.prompt_feedback,
            Some(json!({ "blockReason": "SAFETY" }))
        );
        assert_eq!(
            summary.to_string(),
            r#"candidates=0 parts(text=0 image=0 other=0) feedback={"blockReason":"SAFETY"}"#
        );
    }

    #[test]
    fn unlabeled_mime_falls_back_to_sniffing() {
        let jpeg = fixtures::jpeg(5);
        let response = parse(json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": {
                "mimeType": "application/octet-stream",
                "data": general_purpose::STANDARD.encode(jpeg.bytes())
            }}]}}]
        }));
        let image = extract_first_image(&response).unwrap();
        assert_eq!(image.media_type(), MediaType::Jpeg);
    }

    #[test]
    fn error_body_message_is_extracted() {
        assert_eq!(
            api_error_message(r#"{"error":{"code":400,"message":"API key not valid"}}"#),
            "API key not valid"
        );
        assert_eq!(api_error_message("   "), "empty response body");
        assert_eq!(api_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn request_summary_omits_image_data() {
        let request = GenerationRequest::new("cry", fixtures::png(1), "x".repeat(500), Vec::new());
        let summary = RequestSummary::of(&request);
        assert_eq!(summary.images, vec![("image/png", request.source.len())]);
        assert!(summary.instruction.ends_with("... (truncated)"));
        let rendered = summary.to_string();
        assert!(rendered.starts_with(&format!(
            "label=\"cry\" images=[image/png {}B] instruction=\"xxx",
            request.source.len()
        )));
        assert!(!rendered.contains("iVBOR"));
        assert_eq!(preview("short", 10), "short");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported_as_generation_failure() {
        let client = GeminiImageClient::new(
            "test-key",
            "http://127.0.0.1:9",
            "gemini-test",
            SafetyProfile::Permissive,
            Duration::from_secs(2),
        );
        let err = client
            .generate(GenerationRequest::new(
                "smile",
                fixtures::png(1),
                "smile",
                Vec::new(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::GenerationFailed("smile".to_string()));
        assert_eq!(err.to_string(), "Failed to generate \"smile\", please retry.");
    }
}
