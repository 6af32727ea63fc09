//! Composite/fallback LLM (C5): tries an ordered list of providers, skipping
//! any that are unconfigured or cannot fit the request, and aggregates
//! individual failures into `AllProvidersFailed` if every candidate is
//! exhausted.

use crate::error::LlmError;
use crate::message::LlmMessage;
use crate::provider::{GenerateOptions, GenerateResult, LlmProvider};
use async_trait::async_trait;
use tracing::instrument;

pub struct CompositeLlm {
    providers: Vec<Box<dyn LlmProvider>>,
}

impl CompositeLlm {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    fn candidates(&self, estimated_input_tokens: u64) -> impl Iterator<Item = &dyn LlmProvider> {
        self.providers.iter().filter_map(move |p| {
            if !p.is_configured() {
                log::debug!("skipping provider '{}': not configured", p.get_id());
                return None;
            }
            if estimated_input_tokens > p.get_max_input_tokens() {
                log::debug!(
                    "skipping provider '{}': estimated {} input tokens exceeds its limit of {}",
                    p.get_id(),
                    estimated_input_tokens,
                    p.get_max_input_tokens()
                );
                return None;
            }
            Some(p.as_ref())
        })
    }
}

#[async_trait]
impl LlmProvider for CompositeLlm {
    fn get_id(&self) -> &str {
        "composite"
    }

    fn is_configured(&self) -> bool {
        !self.providers.is_empty() && self.providers.iter().all(|p| p.is_configured())
    }

    fn get_max_input_tokens(&self) -> u64 {
        self.providers
            .iter()
            .map(|p| p.get_max_input_tokens())
            .max()
            .unwrap_or(0)
    }

    #[instrument(name = "composite_llm.generate", skip_all)]
    async fn generate(
        &self,
        messages: &[LlmMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResult, LlmError> {
        let estimated_input_tokens: u64 = messages
            .iter()
            .map(|m| agentkit_core::tokenizer::count_tokens(&m.content.as_text()) as u64)
            .sum();

        let mut failures = Vec::new();
        let mut tried_any = false;

        for provider in self.candidates(estimated_input_tokens) {
            tried_any = true;
            match provider.generate(messages, opts).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    log::warn!("provider '{}' failed: {err}", provider.get_id());
                    failures.push(format!("{}: {err}", provider.get_id()));
                }
            }
        }

        if !tried_any {
            failures.push("no provider was configured and able to fit the request".to_string());
        }
        Err(LlmError::AllProvidersFailed(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Usage;

    struct StubProvider {
        id: &'static str,
        configured: bool,
        max_input_tokens: u64,
        outcome: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn get_id(&self) -> &str {
            self.id
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn get_max_input_tokens(&self) -> u64 {
            self.max_input_tokens
        }

        async fn generate(
            &self,
            _messages: &[LlmMessage],
            _opts: &GenerateOptions,
        ) -> Result<GenerateResult, LlmError> {
            match self.outcome {
                Ok(text) => Ok(GenerateResult {
                    message: LlmMessage::assistant(text),
                    usage: Usage::default(),
                }),
                Err(msg) => Err(LlmError::Provider(msg.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn skips_unconfigured_providers_and_uses_the_next_one() {
        let composite = CompositeLlm::new(vec![
            Box::new(StubProvider {
                id: "unconfigured",
                configured: false,
                max_input_tokens: 100_000,
                outcome: Ok("should not be reached"),
            }),
            Box::new(StubProvider {
                id: "fallback",
                configured: true,
                max_input_tokens: 100_000,
                outcome: Ok("fallback replied"),
            }),
        ]);

        let result = composite
            .generate(&[LlmMessage::user("hi")], &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.message.content.as_text(), "fallback replied");
    }

    #[tokio::test]
    async fn all_providers_failing_aggregates_into_all_providers_failed() {
        let composite = CompositeLlm::new(vec![
            Box::new(StubProvider {
                id: "a",
                configured: true,
                max_input_tokens: 100_000,
                outcome: Err("boom a"),
            }),
            Box::new(StubProvider {
                id: "b",
                configured: true,
                max_input_tokens: 100_000,
                outcome: Err("boom b"),
            }),
        ]);

        let err = composite
            .generate(&[LlmMessage::user("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();
        match err {
            LlmError::AllProvidersFailed(failures) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn providers_over_the_token_limit_are_skipped() {
        let composite = CompositeLlm::new(vec![
            Box::new(StubProvider {
                id: "small-context",
                configured: true,
                max_input_tokens: 1,
                outcome: Ok("should not be reached"),
            }),
            Box::new(StubProvider {
                id: "large-context",
                configured: true,
                max_input_tokens: 1_000_000,
                outcome: Ok("large context replied"),
            }),
        ]);

        let result = composite
            .generate(
                &[LlmMessage::user("a message long enough to need more than one token")],
                &GenerateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.message.content.as_text(), "large context replied");
    }
}
