use std::sync::Arc;
use std::time::Duration;

use ao_domain::{CancelToken, ErrorReason, ToolDefinition, ToolExecutionResult, ToolInvocation};
use ao_tools::{ToolContext, ToolRegistry};
use async_trait::async_trait;
use tokio::sync::Semaphore;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Executes a batch of [`ToolInvocation`]s, bounding how many run at once.
/// An unregistered tool name never panics the batch: it produces
/// an `error_reason = tool_not_found` result at that slot and the rest of the batch proceeds.
#[async_trait]
pub trait ToolRunnerPort: Send + Sync {
    fn definitions(&self, enabled_tools: &[String]) -> Vec<ToolDefinition>;

    async fn execute(
        &self,
        invocations: Vec<ToolInvocation>,
        ctx: ToolContext,
        max_concurrency: usize,
    ) -> Vec<ToolExecutionResult>;
}

/// Default Tool Runner backed by an [`ToolRegistry`]. One `tokio::spawn` task per invocation,
/// gated by a [`Semaphore`] sized to `max_concurrency`; cancellation is observed by racing each
/// tool's own future against a polling loop on the shared [`CancelToken`].
pub struct RegistryToolRunner {
    registry: Arc<ToolRegistry>,
}

impl RegistryToolRunner {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        RegistryToolRunner { registry }
    }
}

async fn watch_cancel(cancel: CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl ToolRunnerPort for RegistryToolRunner {
    fn definitions(&self, enabled_tools: &[String]) -> Vec<ToolDefinition> {
        self.registry.definitions(enabled_tools)
    }

    async fn execute(
        &self,
        invocations: Vec<ToolInvocation>,
        ctx: ToolContext,
        max_concurrency: usize,
    ) -> Vec<ToolExecutionResult> {
        if invocations.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(invocations.len());

        for (idx, invocation) in invocations.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let tool = self.registry.get(&invocation.name);
            let cancel = ctx.cancel.clone();
            // Captured before the spawn so a panicked task can still be reported against the
            // right call id/name — a JoinError carries no payload of its own.
            let id_hint = invocation.id.clone();
            let name_hint = invocation.name.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let id = invocation.id.clone();
                let name = invocation.name.clone();

                let Some(tool) = tool else {
                    return ToolExecutionResult::error(
                        id,
                        name,
                        "no tool registered with this name",
                        ErrorReason::ToolNotFound,
                    );
                };

                if cancel.is_cancelled() {
                    return ToolExecutionResult::error(id, name, "cancelled", ErrorReason::Aborted);
                }

                tokio::select! {
                    result = tool.call(&invocation, &ctx) => result,
                    _ = watch_cancel(cancel) => {
                        ToolExecutionResult::error(id, name, "cancelled", ErrorReason::Aborted)
                    }
                }
            });

            handles.push((idx, id_hint, name_hint, handle));
        }

        let mut results: Vec<(usize, ToolExecutionResult)> = Vec::with_capacity(handles.len());
        for (idx, id_hint, name_hint, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(_) => ToolExecutionResult::error_plain(id_hint, name_hint, "tool task panicked"),
            };
            results.push((idx, result));
        }

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::{Event, EventSink};
    use ao_tools::FileRead;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn publish(&self, _event: Event) {}
    }

    fn ctx() -> ToolContext {
        ToolContext {
            conversation_id: "c1".into(),
            agent_id: "a1".into(),
            message_id: "m1".into(),
            events: Arc::new(NullSink),
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn unregistered_tool_name_does_not_panic_the_batch() {
        let registry = Arc::new(ToolRegistry::new());
        let runner = RegistryToolRunner::new(registry);

        let invocation = ToolInvocation {
            id: "call1".into(),
            name: "does_not_exist".into(),
            parameters: HashMap::new(),
            edit_instruction: None,
        };

        let results = runner.execute(vec![invocation], ctx(), 2).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error());
        assert_eq!(results[0].metadata.error_reason, Some(ErrorReason::ToolNotFound));
    }

    #[tokio::test]
    async fn results_preserve_original_call_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FileRead));
        let runner = RegistryToolRunner::new(Arc::new(registry));

        let invocations = vec![
            ToolInvocation {
                id: "call1".into(),
                name: "missing_a".into(),
                parameters: HashMap::new(),
                edit_instruction: None,
            },
            ToolInvocation {
                id: "call2".into(),
                name: "missing_b".into(),
                parameters: HashMap::new(),
                edit_instruction: None,
            },
        ];

        let results = runner.execute(invocations, ctx(), 4).await;
        assert_eq!(results[0].id, "call1");
        assert_eq!(results[1].id, "call2");
    }

    struct HighWaterMarkTool {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ao_tools::Tool for HighWaterMarkTool {
        fn name(&self) -> &str {
            "hwm"
        }

        fn spec(&self) -> ToolDefinition {
            ToolDefinition {
                name: "hwm".into(),
                description: "records a high water mark".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }
        }

        async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            ToolExecutionResult::success(invocation.id.clone(), "hwm", "ok")
        }
    }

    #[tokio::test]
    async fn max_concurrency_bounds_simultaneous_tool_calls() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(HighWaterMarkTool {
            current: current.clone(),
            peak: peak.clone(),
        }));
        let runner = RegistryToolRunner::new(Arc::new(registry));

        let invocations: Vec<ToolInvocation> = (0..3)
            .map(|i| ToolInvocation {
                id: format!("call{i}"),
                name: "hwm".into(),
                parameters: HashMap::new(),
                edit_instruction: None,
            })
            .collect();

        let results = runner.execute(invocations, ctx(), 2).await;
        assert_eq!(results.len(), 3);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(results.iter().all(|r| !r.is_error()));
    }
}
