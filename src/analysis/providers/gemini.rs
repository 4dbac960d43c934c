use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info};

use super::{FileState, ModelProvider, RequestPart, StagedFile};
use crate::analysis::error::ProviderError;
use crate::analysis::ports::Settings;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Request body for starting a resumable upload
#[derive(Debug, Serialize)]
struct StartUploadRequest {
    file: FileMetadata,
}

#[derive(Debug, Serialize)]
struct FileMetadata {
    display_name: String,
}

/// Response from upload finalization
#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

impl FileResource {
    fn into_staged(self, fallback_mime: &str) -> StagedFile {
        let state = match self.state.as_deref() {
            Some("ACTIVE") => FileState::Active,
            Some("FAILED") => FileState::Failed,
            _ => FileState::Processing,
        };
        let mime_type = if self.mime_type.is_empty() {
            fallback_mime.to_string()
        } else {
            self.mime_type
        };
        StagedFile {
            name: self.name,
            uri: self.uri,
            mime_type,
            state,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        inline_data: InlineData<'a>,
    },
    File {
        file_data: FileData<'a>,
    },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

impl<'a> From<&'a RequestPart> for WirePart<'a> {
    fn from(part: &'a RequestPart) -> Self {
        match part {
            RequestPart::Text(text) => WirePart::Text { text },
            RequestPart::InlineBinary { data, mime_type } => WirePart::Inline {
                inline_data: InlineData {
                    mime_type,
                    data: BASE64.encode(data),
                },
            },
            RequestPart::StagedFileRef {
                file_uri,
                mime_type,
            } => WirePart::File {
                file_data: FileData {
                    mime_type,
                    file_uri,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<u16>,
    message: String,
    status: Option<String>,
}

/// Client for the Gemini REST API (file store + generateContent).
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::new();
        let base_url = endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        info!("Initialized Gemini provider with base URL: {}", base_url);

        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Step 1 of the resumable protocol: obtain the upload session URL.
    async fn start_upload(
        &self,
        settings: &Settings,
        display_name: &str,
        size: usize,
        mime_type: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/upload/v1beta/files", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &settings.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&StartUploadRequest {
                file: FileMetadata {
                    display_name: display_name.to_string(),
                },
            })
            .send()
            .await?;

        let status = response.status();
        let upload_url = response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        upload_url.ok_or_else(|| ProviderError::new("Upload session started without an upload URL"))
    }

    async fn read_response(response: reqwest::Response) -> Result<String, ProviderError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Gemini request failed with status {}: {}", status, body);
            return Err(api_error(status, &body));
        }

        Ok(body)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "Gemini API"
    }

    async fn upload_file(
        &self,
        settings: &Settings,
        path: &Path,
        mime_type: &str,
    ) -> Result<StagedFile, ProviderError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| {
                error!("Failed to read {:?} for upload: {}", path, e);
                ProviderError::new(format!("Failed to read the audio file for upload: {}", e))
            })?;

        let display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("recording-{}", uuid::Uuid::new_v4()));

        debug!(
            "Starting resumable upload of {:?} ({} bytes, {})",
            path,
            data.len(),
            mime_type
        );

        let upload_url = self
            .start_upload(settings, &display_name, data.len(), mime_type)
            .await?;

        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await?;

        let body = Self::read_response(response).await?;
        let uploaded: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::new(format!("Failed to parse upload response: {}", e)))?;

        let staged = uploaded.file.into_staged(mime_type);
        info!("Uploaded {:?} as {} ({})", path, staged.name, staged.state.as_str());
        Ok(staged)
    }

    async fn get_file(&self, settings: &Settings, name: &str) -> Result<StagedFile, ProviderError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &settings.api_key)
            .send()
            .await?;

        let body = Self::read_response(response).await?;
        let file: FileResource = serde_json::from_str(&body)
            .map_err(|e| ProviderError::new(format!("Failed to parse file status: {}", e)))?;

        Ok(file.into_staged(""))
    }

    async fn generate(
        &self,
        settings: &Settings,
        parts: &[RequestPart],
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, settings.model
        );

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: parts.iter().map(WirePart::from).collect(),
            }],
        };

        debug!(
            "Sending generateContent request to {} with {} parts",
            settings.model,
            parts.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &settings.api_key)
            .json(&request)
            .send()
            .await?;

        let body = Self::read_response(response).await?;
        let generated: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::new(format!("Failed to parse model response: {}", e)))?;

        extract_text(generated)
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, ProviderError> {
    let finish_reason = response
        .candidates
        .first()
        .and_then(|c| c.finish_reason.clone());

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text.trim().to_string());
    }

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::with_status(
            400,
            format!("The model refused the request (block reason: {})", reason),
        ));
    }

    Err(ProviderError::new(format!(
        "The model returned an empty response (finish reason: {})",
        finish_reason.as_deref().unwrap_or("unknown")
    )))
}

/// Turn a non-2xx response into a `ProviderError`, embedding the status the
/// way the SDKs do (`[429 RESOURCE_EXHAUSTED] ...`).
fn api_error(status: StatusCode, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => {
            let code = parsed.error.code.unwrap_or(status.as_u16());
            let label = parsed
                .error
                .status
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
            ProviderError::with_status(code, format!("[{} {}] {}", code, label, parsed.error.message))
        }
        Err(_) => ProviderError::with_status(
            status.as_u16(),
            format!("[{}] {}", status.as_u16(), body.trim()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::classify;
    use crate::analysis::error::ErrorKind;
    use std::sync::Arc;

    #[test]
    fn test_api_error_embeds_status() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = api_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.status, Some(429));
        assert!(err.message.starts_with("[429 RESOURCE_EXHAUSTED]"));
        assert_eq!(classify(&err).kind, ErrorKind::QuotaExhausted);
    }

    #[test]
    fn test_api_error_with_plain_body() {
        let err = api_error(StatusCode::SERVICE_UNAVAILABLE, "upstream overloaded\n");
        assert_eq!(err.status, Some(503));
        assert_eq!(err.message, "[503] upstream overloaded");
    }

    #[test]
    fn test_wire_parts_serialization() {
        let parts = vec![
            RequestPart::InlineBinary {
                data: Arc::from(&b"abc"[..]),
                mime_type: "audio/mpeg".to_string(),
            },
            RequestPart::StagedFileRef {
                file_uri: "https://files/abc".to_string(),
                mime_type: "audio/wav".to_string(),
            },
            RequestPart::Text("prompt".to_string()),
        ];
        let wire: Vec<WirePart> = parts.iter().map(WirePart::from).collect();
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(
            json,
            serde_json::json!([
                {"inline_data": {"mime_type": "audio/mpeg", "data": "YWJj"}},
                {"file_data": {"mime_type": "audio/wav", "file_uri": "https://files/abc"}},
                {"text": "prompt"}
            ])
        );
    }

    #[test]
    fn test_file_resource_states() {
        let file: FileResource = serde_json::from_str(
            r#"{"name":"files/x","uri":"https://u","mimeType":"audio/mpeg","state":"ACTIVE"}"#,
        )
        .unwrap();
        let staged = file.into_staged("audio/wav");
        assert_eq!(staged.state, FileState::Active);
        assert_eq!(staged.mime_type, "audio/mpeg");

        let file: FileResource = serde_json::from_str(r#"{"name":"files/y"}"#).unwrap();
        let staged = file.into_staged("audio/wav");
        assert_eq!(staged.state, FileState::Processing);
        assert_eq!(staged.mime_type, "audio/wav");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r##"{"candidates":[{"content":{"parts":[{"text":"# Summary\n"},{"text":"All good"}]},"finishReason":"STOP"}]}"##,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "# Summary\nAll good");
    }

    #[test]
    fn test_extract_text_blocked() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let err = extract_text(response).unwrap_err();
        assert_eq!(err.status, Some(400));
        assert!(err.message.contains("SAFETY"));
    }

    #[test]
    fn test_extract_text_empty() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"MAX_TOKENS"}]}"#,
        )
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(err.message.contains("MAX_TOKENS"));
        assert!(err.status.is_none());
    }

    #[test]
    fn test_base_url_defaults_and_trims() {
        assert_eq!(GeminiProvider::new(None).base_url(), DEFAULT_ENDPOINT);
        assert_eq!(
            GeminiProvider::new(Some("http://localhost:8080/".to_string())).base_url(),
            "http://localhost:8080"
        );
    }
}
