pub mod inference;
pub mod request;

use shared::ClassificationResult;
use std::sync::Arc;

use inference::InferenceClient;
use request::ClassificationRequest;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Invalid image file: {0}")]
    InvalidInput(String),
    #[error("Inference contract violation: {0}")]
    InferenceContractViolation(String),
    #[error("Inference unavailable: {0}")]
    InferenceUnavailable(String),
}

impl ClassifyError {
    /// Message shown to the user. Inference failures are reported generically.
    pub fn user_message(&self) -> String {
        match self {
            ClassifyError::InvalidInput(_) => self.to_string(),
            ClassifyError::InferenceContractViolation(_) | ClassifyError::InferenceUnavailable(_) => {
                "Failed to analyze image. Please try again.".to_string()
            }
        }
    }
}

/// The critical path of a scan: validate, encode, classify.
#[derive(Clone)]
pub struct ClassificationService {
    client: Arc<dyn InferenceClient>,
    max_image_bytes: usize,
}

impl ClassificationService {
    pub fn new(client: Arc<dyn InferenceClient>, max_image_bytes: usize) -> Self {
        Self {
            client,
            max_image_bytes,
        }
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    pub async fn analyze(
        &self,
        image: &[u8],
        declared_mime: Option<&str>,
    ) -> Result<(ClassificationRequest, ClassificationResult), ClassifyError> {
        let request = ClassificationRequest::from_upload(image, declared_mime, self.max_image_bytes)?;
        let result = self.client.classify(&request).await?;
        Ok((request, result))
    }
}
