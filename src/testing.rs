//! Test doubles shared by module tests.

use crate::error::AppError;
use crate::openai::{CompletionProvider, CompletionRequest};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Completion provider that replays scripted answers and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    answers: Mutex<VecDeque<Result<String, AppError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(answers: Vec<Result<String, AppError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(answers: &[&str]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(request);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Upstream("no scripted answer".to_string())))
    }
}
