//! Language model seam
//!
//! Every model interaction in the pipeline is a single call:
//! system prompt + user prompt in, text + token count out.

use crate::Result;
use async_trait::async_trait;

/// One model response with its reported token usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens: u64,
}

impl Completion {
    pub fn new(text: impl Into<String>, tokens: u64) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion>;
}
