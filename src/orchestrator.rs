//! Case/comparison pipeline: validates inputs, then sequences gateway and extractor.

use crate::comparison::{self, ComparisonResult};
use crate::error::AppError;
use crate::gateway::{ModelGateway, PromptKind};
use tracing::{debug, info, warn};

/// One operation per request kind. Validation failures never reach the gateway.
#[derive(Clone)]
pub struct CaseOrchestrator {
    gateway: ModelGateway,
}

impl CaseOrchestrator {
    pub fn new(gateway: ModelGateway) -> Self {
        Self { gateway }
    }

    /// Generate a case study about `topic`. The model text is returned unchanged.
    pub async fn create_case(&self, topic: &str) -> Result<String, AppError> {
        let kind = PromptKind::CaseGeneration { topic };
        validate(&kind)?;
        info!("Generating case study: topic={:?}", topic);
        self.gateway.generate(kind).await
    }

    /// Generate the model's own analysis of a case study.
    pub async fn create_ai_response(&self, case_study: &str) -> Result<String, AppError> {
        let kind = PromptKind::AiResponseGeneration { case_study };
        validate(&kind)?;
        info!("Generating AI response for case ({} chars)", case_study.len());
        self.gateway.generate(kind).await
    }

    /// Ask the model to compare both responses and repair its answer into a full record.
    pub async fn compare(
        &self,
        user_response: &str,
        ai_response: &str,
        case_study: &str,
    ) -> Result<ComparisonResult, AppError> {
        let kind = PromptKind::Comparison {
            case_study,
            user_response,
            ai_response,
        };
        validate(&kind)?;
        info!(
            "Comparing responses (user: {} chars, ai: {} chars)",
            user_response.len(),
            ai_response.len()
        );

        let raw = self.gateway.generate(kind).await?;
        debug!("Raw comparison output: {}", raw);
        comparison::extract(&raw)
    }
}

fn validate(kind: &PromptKind<'_>) -> Result<(), AppError> {
    let missing = kind.missing_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        warn!("{} rejected, missing fields: {:?}", kind.name(), missing);
        Err(AppError::missing(missing))
    }
}
