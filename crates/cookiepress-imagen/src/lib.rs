use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

mod provider;

pub use provider::{
    DEFAULT_MODEL, DEFAULT_SIZE, ImageProvider, OpenAiImageClient, ProviderError, ProviderImage,
};

/// Number of candidates per generation batch.
pub const CANDIDATE_COUNT: usize = 3;

/// Public path prefix the request layer serves generated images under.
pub const GENERATED_URL_PREFIX: &str = "/generated";

/// Wraps the user prompt in the fixed template the downstream geometry tool
/// depends on: clean binary line art, closed shapes, square framing. Applied
/// identically on every call; same prompt in, same engineered prompt out.
pub fn engineered_prompt(prompt: &str) -> String {
    format!(
        "Create a simple black-and-white line drawing with uniform line thickness \
         (no variation). The artwork must be clean, bold, and minimal, with closed \
         shapes only. No colour, shading, gradients, grey tones, textures, or soft \
         edges. Output as a transparent-background PNG, pure black lines (#000000) \
         only. High resolution (2048 \u{d7} 2048 px). Center the composition within a \
         square frame. Subject: {prompt}"
    )
}

/// One generated candidate: the stored filename and its public URL. The URL
/// doubles as the selection key for the conversion step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    pub file: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("prompt is required")]
    EmptyPrompt,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("failed to fetch generated image from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode inline image payload")]
    Decode(#[from] base64::DecodeError),
    #[error("failed to store generated image")]
    Io(#[from] std::io::Error),
}

/// Runs one generation batch: a fixed number of concurrent provider calls,
/// joined all-or-nothing, each response normalized into a PNG on disk.
///
/// A failed batch leaves files already written by sibling calls in place.
pub struct ImageGenerator {
    provider: Arc<dyn ImageProvider>,
    http: reqwest::Client,
    generated_dir: PathBuf,
}

impl ImageGenerator {
    pub fn new(provider: Arc<dyn ImageProvider>, generated_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            http: reqwest::Client::new(),
            generated_dir: generated_dir.into(),
        }
    }

    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    /// Generates `CANDIDATE_COUNT` candidates for `prompt`. Results are in
    /// call-issuance order; any single failure fails the whole batch.
    pub async fn generate_designs(&self, prompt: &str) -> Result<Vec<Design>, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        tokio::fs::create_dir_all(&self.generated_dir).await?;
        let engineered = engineered_prompt(prompt);
        debug!(prompt, "running image generation batch");

        let designs = try_join_all(
            (0..CANDIDATE_COUNT).map(|index| self.generate_one(&engineered, index)),
        )
        .await?;
        debug!(count = designs.len(), "image generation batch complete");
        Ok(designs)
    }

    async fn generate_one(
        &self,
        engineered_prompt: &str,
        index: usize,
    ) -> Result<Design, GenerationError> {
        let image = self.provider.generate(engineered_prompt).await?;
        let bytes = self.normalize(image).await?;

        let millis = Utc::now().timestamp_millis();
        let file = format!("design_{millis}_{index}.png");
        tokio::fs::write(self.generated_dir.join(&file), &bytes).await?;

        Ok(Design {
            url: format!("{GENERATED_URL_PREFIX}/{file}"),
            file,
        })
    }

    async fn normalize(&self, image: ProviderImage) -> Result<Vec<u8>, GenerationError> {
        match image {
            ProviderImage::Url(url) => {
                let wrap = |source| GenerationError::Fetch {
                    url: url.clone(),
                    source,
                };
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(wrap)?;
                Ok(response.bytes().await.map_err(wrap)?.to_vec())
            }
            ProviderImage::Base64(payload) => Ok(BASE64.decode(payload.as_bytes())?),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    use super::{
        CANDIDATE_COUNT, GenerationError, ImageGenerator, ImageProvider, ProviderError,
        ProviderImage, engineered_prompt,
    };

    struct InlineProvider {
        calls: AtomicUsize,
        fail_from_call: Option<usize>,
    }

    impl InlineProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: None,
            }
        }

        fn failing_from(call: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: Some(call),
            }
        }
    }

    #[async_trait]
    impl ImageProvider for InlineProvider {
        async fn generate(&self, _prompt: &str) -> Result<ProviderImage, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_from_call.is_some_and(|fail_from| call >= fail_from) {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "provider exploded".to_string(),
                });
            }
            Ok(ProviderImage::Base64(BASE64.encode(b"png bytes")))
        }
    }

    #[test]
    fn engineered_prompt_contains_original_text() {
        let engineered = engineered_prompt("rocket ship");
        assert!(engineered.contains("rocket ship"));
        assert!(engineered.contains("black-and-white line drawing"));
        assert!(engineered.contains("closed shapes only"));
        assert!(engineered.contains("transparent-background PNG"));
        assert!(engineered.contains("square frame"));
    }

    #[test]
    fn engineered_prompt_is_deterministic() {
        assert_eq!(engineered_prompt("a cat"), engineered_prompt("a cat"));
    }

    #[tokio::test]
    async fn empty_prompt_fails_before_any_provider_call() {
        let provider = Arc::new(InlineProvider::new());
        let dir = tempfile::tempdir().expect("tempdir should create");
        let generator = ImageGenerator::new(provider.clone(), dir.path());

        let err = generator
            .generate_designs("   ")
            .await
            .expect_err("blank prompt should fail");
        assert!(matches!(err, GenerationError::EmptyPrompt));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_returns_three_designs_with_unique_files_on_disk() {
        let provider = Arc::new(InlineProvider::new());
        let dir = tempfile::tempdir().expect("tempdir should create");
        let generator = ImageGenerator::new(provider.clone(), dir.path());

        let designs = generator
            .generate_designs("rocket ship")
            .await
            .expect("batch should succeed");

        assert_eq!(designs.len(), CANDIDATE_COUNT);
        assert_eq!(provider.calls.load(Ordering::SeqCst), CANDIDATE_COUNT);

        let unique: HashSet<_> = designs.iter().map(|design| design.file.as_str()).collect();
        assert_eq!(unique.len(), CANDIDATE_COUNT);

        for design in &designs {
            assert_eq!(design.url, format!("/generated/{}", design.file));
            let stored = std::fs::read(dir.path().join(&design.file))
                .expect("design file should exist on disk");
            assert_eq!(stored, b"png bytes");
        }
    }

    #[tokio::test]
    async fn batch_results_are_in_issuance_order() {
        let provider = Arc::new(InlineProvider::new());
        let dir = tempfile::tempdir().expect("tempdir should create");
        let generator = ImageGenerator::new(provider, dir.path());

        let designs = generator
            .generate_designs("a dinosaur")
            .await
            .expect("batch should succeed");

        for (index, design) in designs.iter().enumerate() {
            assert!(
                design.file.ends_with(&format!("_{index}.png")),
                "design {index} carries wrong ordinal: {}",
                design.file
            );
        }
    }

    #[tokio::test]
    async fn one_failing_call_fails_the_whole_batch() {
        let provider = Arc::new(InlineProvider::failing_from(1));
        let dir = tempfile::tempdir().expect("tempdir should create");
        let generator = ImageGenerator::new(provider, dir.path());

        let err = generator
            .generate_designs("a cat")
            .await
            .expect_err("batch should fail with one failing call");
        assert!(matches!(
            err,
            GenerationError::Provider(ProviderError::Api { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn malformed_base64_payload_fails_the_batch() {
        struct BadPayloadProvider;

        #[async_trait]
        impl ImageProvider for BadPayloadProvider {
            async fn generate(&self, _prompt: &str) -> Result<ProviderImage, ProviderError> {
                Ok(ProviderImage::Base64("not base64!!".to_string()))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir should create");
        let generator = ImageGenerator::new(Arc::new(BadPayloadProvider), dir.path());

        let err = generator
            .generate_designs("a cat")
            .await
            .expect_err("undecodable payload should fail");
        assert!(matches!(err, GenerationError::Decode(_)));
    }
}
