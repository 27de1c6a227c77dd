use std::collections::VecDeque;

use ao_domain::{CancelToken, CompletionResult};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::port::{ChatParams, LlmPort, ProviderError, StreamCallbacks};

/// One scripted turn of a [`MockLlmProvider`]. `cancel_after_chunks`, when set, fires the
/// cancel token passed into `stream` after that many chunks have been emitted, letting a test
/// deterministically reproduce mid-stream cancellation without a second
/// task.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub completion: CompletionResult,
    pub chunk_count: usize,
    pub cancel_after_chunks: Option<usize>,
}

impl ScriptedResponse {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedResponse {
            completion: CompletionResult {
                content: content.into(),
                ..Default::default()
            },
            chunk_count: 1,
            cancel_after_chunks: None,
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ao_domain::ToolCall>) -> Self {
        ScriptedResponse {
            completion: CompletionResult {
                content: String::new(),
                tool_calls: Some(tool_calls),
                ..Default::default()
            },
            chunk_count: 1,
            cancel_after_chunks: None,
        }
    }

    pub fn with_usage(mut self, usage: ao_domain::Usage) -> Self {
        self.completion.usage = Some(usage);
        self
    }

    pub fn chunked(mut self, chunk_count: usize) -> Self {
        self.chunk_count = chunk_count;
        self
    }

    pub fn cancel_after(mut self, chunks: usize) -> Self {
        self.cancel_after_chunks = Some(chunks);
        self
    }
}

/// A deterministic, scriptable [`LlmPort`] used by the Turn Engine's own tests. Never shipped
/// as a production provider; real adapters (HTTP transport to a model vendor) are external
/// collaborators.
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        MockLlmProvider {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    fn next_response(&self) -> Result<ScriptedResponse, ProviderError> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::Provider {
                provider: "mock".into(),
                message: "no scripted response left".into(),
            })
    }
}

#[async_trait]
impl LlmPort for MockLlmProvider {
    async fn generate(
        &self,
        _params: &ChatParams,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(self.next_response()?.completion)
    }

    async fn stream(
        &self,
        _params: &ChatParams,
        callbacks: &dyn StreamCallbacks,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, ProviderError> {
        let scripted = self.next_response()?;
        let content = scripted.completion.content.clone();
        let chunk_count = scripted.chunk_count.max(1);
        let chars: Vec<char> = content.chars().collect();
        let chunk_len = (chars.len() / chunk_count).max(1);

        let mut emitted_chunks = 0usize;
        for chunk in chars.chunks(chunk_len) {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let piece: String = chunk.iter().collect();
            callbacks.on_chunk(&piece, None).await;
            emitted_chunks += 1;
            if scripted.cancel_after_chunks == Some(emitted_chunks) {
                cancel.cancel();
            }
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        callbacks
            .on_stream_finish(Some("stop".to_string()), scripted.completion.usage)
            .await;
        Ok(scripted.completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ChatParams, ToolChoice};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params() -> ChatParams {
        ChatParams {
            messages: vec![],
            model: "mock-model".into(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: None,
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            reasoning_effort: None,
            include_usage: true,
        }
    }

    struct CountingSink {
        chunks: AtomicUsize,
    }

    #[async_trait]
    impl StreamCallbacks for CountingSink {
        async fn on_chunk(&self, _delta: &str, _usage: Option<ao_domain::Usage>) {
            self.chunks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn generate_returns_scripted_response_in_order() {
        let provider = MockLlmProvider::new(vec![
            ScriptedResponse::text("first"),
            ScriptedResponse::text("second"),
        ]);
        let cancel = CancelToken::new();
        let r1 = provider.generate(&params(), &cancel).await.unwrap();
        let r2 = provider.generate(&params(), &cancel).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
    }

    #[tokio::test]
    async fn generate_errors_when_script_exhausted() {
        let provider = MockLlmProvider::new(vec![]);
        let cancel = CancelToken::new();
        assert!(provider.generate(&params(), &cancel).await.is_err());
    }

    #[tokio::test]
    async fn stream_emits_chunks_and_finishes() {
        let provider = MockLlmProvider::new(vec![ScriptedResponse::text("hello world").chunked(3)]);
        let cancel = CancelToken::new();
        let sink = CountingSink {
            chunks: AtomicUsize::new(0),
        };
        let result = provider.stream(&params(), &sink, &cancel).await.unwrap();
        assert_eq!(result.content, "hello world");
        assert!(sink.chunks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn stream_cancels_mid_flight() {
        let provider = MockLlmProvider::new(vec![ScriptedResponse::text("Partial more text")
            .chunked(4)
            .cancel_after(1)]);
        let cancel = CancelToken::new();
        let sink = CountingSink {
            chunks: AtomicUsize::new(0),
        };
        let result = provider.stream(&params(), &sink, &cancel).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert!(cancel.is_cancelled());
    }
}
