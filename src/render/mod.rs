//! Document rendering: HTML templates plus a pluggable HTML-to-bytes renderer.
//!
//! The adapter fills one of two fixed templates and hands the markup to a
//! [`DocumentRenderer`] unmodified. Interpolated text is HTML-escaped unless
//! escaping is switched off for parity with the unescaped legacy output.

pub mod pdf;

use crate::comparison::ComparisonResult;
use crate::error::AppError;
use std::sync::Arc;
use tracing::{debug, info};

/// What to render.
#[derive(Debug, Clone)]
pub enum RenderRequest {
    Case {
        case_study: String,
    },
    Comparison {
        user_response: String,
        ai_response: String,
        comparison: ComparisonResult,
    },
}

impl RenderRequest {
    /// Every prefix [`file_prefix`](Self::file_prefix) can return.
    pub const FILE_PREFIXES: [&'static str; 2] = ["caso", "comparacion"];

    /// File-name prefix for the stored document.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Case { .. } => Self::FILE_PREFIXES[0],
            Self::Comparison { .. } => Self::FILE_PREFIXES[1],
        }
    }
}

/// Black-box HTML-to-document converter.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, html: &str) -> Result<Vec<u8>, AppError>;
}

/// Builds the HTML for a [`RenderRequest`] and delegates byte production.
#[derive(Clone)]
pub struct RendererAdapter {
    renderer: Arc<dyn DocumentRenderer>,
    escape_html: bool,
}

impl RendererAdapter {
    pub fn new(renderer: Arc<dyn DocumentRenderer>, escape_html: bool) -> Self {
        Self {
            renderer,
            escape_html,
        }
    }

    pub fn build_html(&self, request: &RenderRequest) -> String {
        let text = |s: &str| {
            if self.escape_html {
                escape_html(s)
            } else {
                s.to_string()
            }
        };

        match request {
            RenderRequest::Case { case_study } => case_template(&text(case_study)),
            RenderRequest::Comparison {
                user_response,
                ai_response,
                comparison,
            } => comparison_template(&[
                ("Respuesta del usuario", text(user_response)),
                ("Respuesta de la IA", text(ai_response)),
                ("Porcentaje de similitud", text(comparison.similarity_percentage())),
                ("Patrones", text(comparison.patterns())),
                ("Similitudes", text(comparison.similarities())),
                ("Diferencias", text(comparison.differences())),
                ("Confiabilidad", text(comparison.reliability())),
            ]),
        }
    }

    /// Render a request to document bytes. Rendering runs on the blocking pool.
    pub async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, AppError> {
        let html = self.build_html(request);
        debug!("Rendering {} document ({} chars of HTML)", request.file_prefix(), html.len());

        let renderer = Arc::clone(&self.renderer);
        let bytes = tokio::task::spawn_blocking(move || renderer.render(&html))
            .await
            .map_err(|e| AppError::Render(format!("render task failed: {}", e)))??;

        if bytes.is_empty() {
            return Err(AppError::Render("renderer produced no output".to_string()));
        }

        info!("Rendered {} document: {} bytes", request.file_prefix(), bytes.len());
        Ok(bytes)
    }
}

const STYLE: &str = "body { font-family: Helvetica, Arial, sans-serif; margin: 40px; color: #222; } \
h1 { color: #1a3c6e; } h2 { color: #1a3c6e; margin-top: 24px; } \
.content { white-space: pre-wrap; line-height: 1.5; }";

fn case_template(case_study: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head><meta charset="utf-8"><title>Caso de Estudio</title><style>{STYLE}</style></head>
<body>
<h1>Caso de Estudio - Gestión de Riesgos ISO 31000</h1>
<div class="content">{case_study}</div>
</body>
</html>"#
    )
}

fn comparison_template(sections: &[(&str, String)]) -> String {
    let body: String = sections
        .iter()
        .map(|(title, content)| {
            format!("<h2>{}</h2>\n<div class=\"content\">{}</div>\n", title, content)
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head><meta charset="utf-8"><title>Comparación de Respuestas</title><style>{STYLE}</style></head>
<body>
<h1>Comparación de Respuestas - ISO 31000</h1>
{body}</body>
</html>"#
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
