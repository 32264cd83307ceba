use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-image-1";
// gpt-image-1 renders up to 1024x1024; the engineered prompt asks for more
// and the provider downscales.
pub const DEFAULT_SIZE: &str = "1024x1024";

/// One normalizable provider response: either a fetchable location or the
/// image bytes inline, base64-encoded. Exactly one form per response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderImage {
    Url(String),
    Base64(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("image provider request failed")]
    Http(#[from] reqwest::Error),
    #[error("image provider returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response format from image provider: {0}")]
    MalformedResponse(String),
}

/// External image-generation provider. One call produces one candidate.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<ProviderImage, ProviderError>;
}

/// Client for an OpenAI-compatible images endpoint. Api key and base URL are
/// constructor parameters; nothing is read from the process environment here.
pub struct OpenAiImageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    size: String,
}

impl OpenAiImageClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            size: DEFAULT_SIZE.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct GenerateImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl ImageProvider for OpenAiImageClient {
    async fn generate(&self, prompt: &str) -> Result<ProviderImage, ProviderError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&GenerateImagesRequest {
                model: &self.model,
                prompt,
                size: &self.size,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .map(|detail| detail.message)
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateImagesResponse = response.json().await?;
        let Some(datum) = body.data.into_iter().next() else {
            return Err(ProviderError::MalformedResponse(
                "response carried no image data".to_string(),
            ));
        };
        normalize_datum(datum)
    }
}

fn normalize_datum(datum: ImageDatum) -> Result<ProviderImage, ProviderError> {
    match (datum.url, datum.b64_json) {
        (Some(url), None) => Ok(ProviderImage::Url(url)),
        (None, Some(payload)) => Ok(ProviderImage::Base64(payload)),
        (Some(_), Some(_)) => Err(ProviderError::MalformedResponse(
            "response carried both a url and inline image data".to_string(),
        )),
        (None, None) => Err(ProviderError::MalformedResponse(
            "response carried neither a url nor inline image data".to_string(),
        )),
    }
}
