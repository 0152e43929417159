//! Request types and the dispatch path shared by all three operations:
//! validate, render the prompt, call the completion service, normalize.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::clients::{CompletionClient, CompletionRequest, OpenAiClient};
use crate::config::Config;
use crate::error::{ExploreError, Result};
use crate::normalize::{
    DecomposeResult, OptionsResult, SummaryResult, normalize_decompose, normalize_options,
    normalize_summary,
};
use crate::prompts::{PromptDocument, PromptInputs, PromptKind, PromptRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecomposeRequest {
    pub text: String,
    pub user_context: String,
    pub selected_options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsRequest {
    pub text: String,
    /// The overall goal the sub-problem in `text` belongs to
    #[serde(default)]
    pub context: Option<String>,
    pub user_context: String,
    pub selected_options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub text: String,
    pub user_context: String,
    pub selected_options: Vec<String>,
}

/// Ties a request type to its prompt and its response normalizer.
pub trait Operation {
    const KIND: PromptKind;
    type Output;

    fn inputs(&self) -> PromptInputs<'_>;

    fn normalize(raw: &str) -> Result<Self::Output>;

    fn validate(&self) -> Result<()> {
        if self.inputs().text.trim().is_empty() {
            return Err(ExploreError::validation("text must not be empty"));
        }
        Ok(())
    }

    /// Validate and render the prompt document for this request.
    fn render(&self, prompts: &PromptRegistry) -> Result<PromptDocument> {
        self.validate()?;
        Ok(prompts.render(Self::KIND, &self.inputs()))
    }
}

impl Operation for DecomposeRequest {
    const KIND: PromptKind = PromptKind::Decompose;
    type Output = DecomposeResult;

    fn inputs(&self) -> PromptInputs<'_> {
        PromptInputs {
            text: &self.text,
            context: "",
            user_context: &self.user_context,
            selected_options: &self.selected_options,
        }
    }

    fn normalize(raw: &str) -> Result<DecomposeResult> {
        normalize_decompose(raw)
    }
}

impl Operation for OptionsRequest {
    const KIND: PromptKind = PromptKind::Options;
    type Output = OptionsResult;

    fn inputs(&self) -> PromptInputs<'_> {
        PromptInputs {
            text: &self.text,
            context: self.context.as_deref().unwrap_or(""),
            user_context: &self.user_context,
            selected_options: &self.selected_options,
        }
    }

    fn normalize(raw: &str) -> Result<OptionsResult> {
        normalize_options(raw)
    }
}

impl Operation for SummaryRequest {
    const KIND: PromptKind = PromptKind::Summary;
    type Output = SummaryResult;

    fn inputs(&self) -> PromptInputs<'_> {
        PromptInputs {
            text: &self.text,
            context: "",
            user_context: &self.user_context,
            selected_options: &self.selected_options,
        }
    }

    fn normalize(raw: &str) -> Result<SummaryResult> {
        normalize_summary(raw)
    }
}

/// Runs operations against one completion client. Holds no per-request state.
#[derive(Clone)]
pub struct Operations {
    client: Arc<dyn CompletionClient>,
    prompts: PromptRegistry,
    structured: bool,
}

impl Operations {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: PromptRegistry, structured: bool) -> Self {
        Self {
            client,
            prompts,
            structured,
        }
    }

    /// Build the OpenAI-backed dispatcher from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OpenAiClient::new(&config.completion, config.runtime.api_key.clone())?;
        Ok(Self::new(
            Arc::new(client),
            PromptRegistry::new(),
            config.completion.structured_output,
        ))
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn structured(&self) -> bool {
        self.structured
    }

    pub async fn run<O: Operation>(&self, request: &O, cancel: &CancellationToken) -> Result<O::Output> {
        let operation = O::KIND.as_str();
        let document = request.render(&self.prompts)?;
        debug!(
            "Rendered {} prompt (id={}, version={}, checksum={}, chars={})",
            operation,
            document.prompt_id,
            document.version,
            document.checksum,
            document.text.len()
        );

        let completion = self
            .client
            .complete(
                CompletionRequest {
                    prompt: document.text,
                    structured: self.structured,
                },
                cancel,
            )
            .await
            .map_err(|e| {
                error!("{} completion failed: {}", operation, e);
                ExploreError::from_completion(operation, e)
            })?;
        debug!("{} completion took {}ms", operation, completion.latency_ms);

        O::normalize(&completion.text)
    }

    pub async fn decompose(
        &self,
        request: &DecomposeRequest,
        cancel: &CancellationToken,
    ) -> Result<DecomposeResult> {
        self.run(request, cancel).await
    }

    pub async fn options(
        &self,
        request: &OptionsRequest,
        cancel: &CancellationToken,
    ) -> Result<OptionsResult> {
        self.run(request, cancel).await
    }

    pub async fn summary(
        &self,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<SummaryResult> {
        self.run(request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{Completion, CompletionError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed reply and records the prompts it was sent
    struct Scripted {
        reply: std::result::Result<String, fn() -> CompletionError>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: fn() -> CompletionError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(
            &self,
            request: CompletionRequest,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Completion, CompletionError> {
            self.seen.lock().unwrap().push(request);
            match &self.reply {
                Ok(text) => Ok(Completion {
                    text: text.clone(),
                    model: "scripted".to_string(),
                    latency_ms: 0,
                }),
                Err(make) => Err(make()),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn ops(client: Arc<Scripted>) -> Operations {
        Operations::new(client, PromptRegistry::new(), true)
    }

    #[tokio::test]
    async fn decompose_sends_rendered_prompt_in_structured_mode() {
        let client = Scripted::ok(r#"{"sub_problems":["a","b"]}"#);
        let request = DecomposeRequest {
            text: "Run a marathon".to_string(),
            user_context: "beginner".to_string(),
            selected_options: vec!["mornings".to_string()],
        };
        let result = ops(client.clone())
            .decompose(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.sub_problems, vec!["a", "b"]);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].structured);
        assert!(seen[0].prompt.contains("main goal of: Run a marathon"));
        assert!(seen[0].prompt.contains(r#"["mornings"]"#));
    }

    #[tokio::test]
    async fn blank_text_fails_before_upstream_call() {
        let client = Scripted::ok("unused");
        let request = SummaryRequest {
            text: "   ".to_string(),
            ..SummaryRequest::default()
        };
        let err = ops(client.clone())
            .summary(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn options_context_reaches_prompt() {
        let client = Scripted::ok(r#"{"recommended":"R","options":["1","2","3","4","5"]}"#);
        let request = OptionsRequest {
            text: "Plan a trip".to_string(),
            context: Some("Choose a destination".to_string()),
            ..OptionsRequest::default()
        };
        let result = ops(client.clone())
            .options(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.recommended, "R");
        let seen = client.seen.lock().unwrap();
        assert!(seen[0].prompt.contains("The user wants to: Choose a destination"));
    }

    #[tokio::test]
    async fn upstream_timeout_becomes_timeout_error() {
        let client = Scripted::failing(|| CompletionError::Timeout { timeout_ms: 10 });
        let request = DecomposeRequest {
            text: "x".to_string(),
            ..DecomposeRequest::default()
        };
        let err = ops(client)
            .decompose(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExploreError::Timeout { timeout_ms: 10, .. }));
        assert_eq!(err.kind(), "upstream_error");
    }

    #[tokio::test]
    async fn short_option_lists_are_parse_errors() {
        let client = Scripted::ok(r#"{"recommended":"R","options":["1","2"]}"#);
        let request = OptionsRequest {
            text: "x".to_string(),
            ..OptionsRequest::default()
        };
        let err = ops(client)
            .options(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn render_is_available_without_a_client() {
        let request = SummaryRequest {
            text: "Write a cover letter".to_string(),
            ..SummaryRequest::default()
        };
        let doc = request.render(&PromptRegistry::new()).unwrap();
        assert_eq!(doc.prompt_id, "summary-v1");
        assert!(doc.text.starts_with("User: Write a cover letter\n"));
    }

    #[test]
    fn personalization_fields_are_required() {
        assert!(serde_json::from_str::<SummaryRequest>(r#"{"text":"x","selected_options":[]}"#).is_err());
        assert!(serde_json::from_str::<DecomposeRequest>(r#"{"text":"x","user_context":""}"#).is_err());

        let request: OptionsRequest =
            serde_json::from_str(r#"{"text":"x","user_context":"","selected_options":[]}"#).unwrap();
        assert_eq!(request.context, None);
        assert_eq!(request.inputs().context, "");
    }
}
