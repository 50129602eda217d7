use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use claimlens_llm::{LlmClient, LlmRequest};

/// Narrow seam over the generation service so the classifier and chat
/// responder can be exercised with stubs.
pub trait Generate: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl Generate for LlmClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.chat_blocking(&LlmRequest::user_prompt(prompt))
            .map(|response| response.content)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of a classification attempt. Failure carries the cause and the
/// attempt count instead of surfacing as an error; callers observe it
/// directly or render it with [`ClassifyOutcome::into_raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyOutcome {
    Success(String),
    Failure { cause: String, attempts: u32 },
}

impl ClassifyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ClassifyOutcome::Success(_))
    }

    /// Render the outcome as raw verdict text. Failures become a terminal
    /// `Unknown` verdict in the same textual convention the model uses, so
    /// the verdict parser downstream always produces a well-formed pair.
    pub fn into_raw(self) -> String {
        match self {
            ClassifyOutcome::Success(text) => text,
            ClassifyOutcome::Failure { cause, attempts } => format!(
                "Status: Unknown\nReason: classification failed after {attempts} attempts: {cause}"
            ),
        }
    }
}

/// Retry-safe invoice classifier over a generation service.
pub struct Classifier<G> {
    service: G,
    config: ClassifierConfig,
}

impl<G: Generate> Classifier<G> {
    pub fn new(service: G) -> Self {
        Self {
            service,
            config: ClassifierConfig::default(),
        }
    }

    pub fn with_config(service: G, config: ClassifierConfig) -> Self {
        Self { service, config }
    }

    /// Classify one invoice against the policy.
    ///
    /// Transient generation failures are retried up to `max_retries` with
    /// linear backoff (`base_delay * attempt`). This never panics and never
    /// returns an error; a persistent failure is encoded in the outcome.
    /// Repeated calls with identical inputs are not guaranteed identical
    /// text, the model is not deterministic.
    pub fn classify(&self, policy_text: &str, invoice_text: &str) -> ClassifyOutcome {
        let prompt = build_prompt(policy_text, invoice_text);
        let max_attempts = self.config.max_retries.max(1);
        let mut last_cause = String::new();
        for attempt in 1..=max_attempts {
            match self.service.generate(&prompt) {
                Ok(text) => return ClassifyOutcome::Success(text.trim().to_string()),
                Err(err) => {
                    last_cause = err.to_string();
                    warn!(attempt, max_attempts, error = %last_cause, "classification attempt failed");
                    if attempt < max_attempts {
                        thread::sleep(self.config.base_delay * attempt);
                    }
                }
            }
        }
        ClassifyOutcome::Failure {
            cause: last_cause,
            attempts: max_attempts,
        }
    }
}

fn build_prompt(policy_text: &str, invoice_text: &str) -> String {
    format!(
        "You are an invoice checker.\n\n\
         Policy:\n{policy_text}\n\n\
         Invoice:\n{invoice_text}\n\n\
         Task:\n\
         Is the invoice valid as per the policy?\n\
         Reply in this format:\n\
         Status: Fully Reimbursed / Partially Reimbursed / Declined\n\
         Reason: <why?>"
    )
}
