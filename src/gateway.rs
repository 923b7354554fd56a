//! Model gateway: turns a prompt kind into a role-structured completion call.

use crate::config::{
    ModelOverrides, PromptProfile, AI_RESPONSE_PROFILE, CASE_PROFILE, COMPARISON_PROFILE,
};
use crate::error::AppError;
use crate::openai::{CompletionProvider, CompletionRequest, Message};
use std::sync::Arc;
use tracing::{debug, info};

/// The three prompts the service knows how to send, with their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind<'a> {
    CaseGeneration {
        topic: &'a str,
    },
    AiResponseGeneration {
        case_study: &'a str,
    },
    Comparison {
        case_study: &'a str,
        user_response: &'a str,
        ai_response: &'a str,
    },
}

impl<'a> PromptKind<'a> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CaseGeneration { .. } => "case-generation",
            Self::AiResponseGeneration { .. } => "ai-response-generation",
            Self::Comparison { .. } => "comparison",
        }
    }

    pub fn profile(&self) -> &'static PromptProfile {
        match self {
            Self::CaseGeneration { .. } => &CASE_PROFILE,
            Self::AiResponseGeneration { .. } => &AI_RESPONSE_PROFILE,
            Self::Comparison { .. } => &COMPARISON_PROFILE,
        }
    }

    /// Wire names of the required parameters that are blank, in request order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let params: Vec<(&'static str, &str)> = match *self {
            Self::CaseGeneration { topic } => vec![("topic", topic)],
            Self::AiResponseGeneration { case_study } => vec![("caseStudy", case_study)],
            Self::Comparison {
                case_study,
                user_response,
                ai_response,
            } => vec![
                ("userResponse", user_response),
                ("aiResponse", ai_response),
                ("caseStudy", case_study),
            ],
        };

        params
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// The user-turn prompt text.
    pub fn user_prompt(&self) -> String {
        match *self {
            Self::CaseGeneration { topic } => format!(
                r#"Genera un caso de estudio detallado sobre {topic} que incluya:
- Contexto de la organización
- Identificación de riesgos
- Análisis de riesgos
- Evaluación de riesgos
- Posibles tratamientos de riesgo
- Relación con la norma ISO 31000

El caso debe ser realista y adecuado para un análisis profesional.
La empresa del caso debe tener un nombre creativo, nunca "empresa XYZ" o "lugar XYZ".
No debe sobrepasar los 200 caracteres y debe ser claro y conciso."#
            ),
            Self::AiResponseGeneration { case_study } => format!(
                r#"Analiza el siguiente caso de estudio sobre gestión de riesgos y proporciona una respuesta profesional que no sobrepase los 400 caracteres y que incluya:
- Identificación de los principales riesgos
- Análisis de impacto y probabilidad
- Recomendaciones de tratamiento según ISO 31000
- Plan de acción sugerido

Caso de estudio:
{case_study}"#
            ),
            Self::Comparison {
                case_study,
                user_response,
                ai_response,
            } => format!(
                r#"Compara las siguientes dos respuestas a un caso de estudio sobre gestión de riesgos según ISO 31000 y devuelve un análisis en formato JSON válido con las claves: similarityPercentage, patterns, similarities, differences, reliability. Si algún campo no aplica, usa "No disponible" como valor.

Caso de estudio:
{case_study}

Respuesta del usuario:
{user_response}

Respuesta de la IA:
{ai_response}

El formato de respuesta debe ser exactamente este:
{{
  "similarityPercentage": "porcentaje entero de similitud, por ejemplo 65%",
  "patterns": "texto descriptivo o 'No disponible'",
  "similarities": "texto descriptivo o 'No disponible'",
  "differences": "texto descriptivo o 'No disponible'",
  "reliability": "texto descriptivo o 'No disponible'"
}}"#
            ),
        }
    }
}

/// Sends prompts to the injected completion provider.
#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn CompletionProvider>,
    models: ModelOverrides,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>, models: ModelOverrides) -> Self {
        Self { provider, models }
    }

    /// Build the completion request for a prompt kind.
    pub fn request_for(&self, kind: &PromptKind<'_>) -> CompletionRequest {
        let profile = kind.profile();
        let model = match kind {
            PromptKind::CaseGeneration { .. } => self.models.case.as_deref(),
            PromptKind::AiResponseGeneration { .. } => self.models.ai_response.as_deref(),
            PromptKind::Comparison { .. } => self.models.comparison.as_deref(),
        }
        .unwrap_or(profile.model);

        CompletionRequest {
            model: model.to_string(),
            messages: vec![Message::system(profile.system), Message::user(kind.user_prompt())],
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            json_mode: profile.json_mode,
        }
    }

    /// Run one completion. Single attempt: failures propagate immediately.
    ///
    /// Blank parameters are rejected before anything is sent.
    pub async fn generate(&self, kind: PromptKind<'_>) -> Result<String, AppError> {
        let missing = kind.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::missing(missing));
        }

        let request = self.request_for(&kind);
        debug!(
            "Gateway {}: model={}, prompt {} chars",
            kind.name(),
            request.model,
            request.messages.iter().map(|m| m.content.len()).sum::<usize>()
        );

        let text = self.provider.complete(request).await?;
        info!("Gateway {}: received {} chars", kind.name(), text.len());
        Ok(text)
    }
}
