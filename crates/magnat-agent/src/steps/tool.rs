use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::ToolService;
use magnat_core::types::{Action, Message, ToolCall, ToolResult};
use magnat_core::{ConversationState, MAIN_CHANNEL};

use crate::graph::{RetryPolicy, Step};

/// Runs the tool calls requested by the latest assistant answer and appends
/// one tool message per call, in request order. Always returns `default`.
pub struct ToolStep {
    name: String,
    channel: String,
    tools: Arc<dyn ToolService>,
    retry: RetryPolicy,
}

impl ToolStep {
    pub fn new(name: impl Into<String>, tools: Arc<dyn ToolService>) -> Self {
        Self {
            name: name.into(),
            channel: MAIN_CHANNEL.to_string(),
            tools,
            retry: RetryPolicy::default(),
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn call_one(&self, call: &ToolCall) -> Result<ToolResult> {
        match self.tools.call(&call.name, &call.arguments).await {
            Ok(result) => Ok(result),
            // Bad requests go back to the model as error results.
            Err(e) if !e.is_transient() => {
                warn!(step = %self.name, tool = %call.name, error = %e, "Tool call rejected");
                Ok(ToolResult::error(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

impl Step for ToolStep {
    type Input = Vec<ToolCall>;
    type Output = Vec<ToolResult>;

    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn prepare(&self, state: &ConversationState) -> Result<Vec<ToolCall>> {
        let calls = state
            .channel(&self.channel)
            .and_then(|d| d.last())
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();
        if calls.is_empty() {
            warn!(step = %self.name, channel = %self.channel, "No pending tool calls");
        }
        Ok(calls)
    }

    fn execute<'a>(&'a self, calls: &'a Vec<ToolCall>) -> BoxFuture<'a, Result<Vec<ToolResult>>> {
        Box::pin(async move {
            let futs = calls.iter().map(|call| self.call_one(call));
            let results = futures::future::join_all(futs).await;

            let mut out = Vec::with_capacity(results.len());
            for (call, result) in calls.iter().zip(results) {
                let result = result.map_err(|e| match e {
                    MagnatError::ToolExecution { .. } | MagnatError::ToolTimeout { .. } => e,
                    other => MagnatError::ToolExecution {
                        tool: call.name.clone(),
                        message: other.to_string(),
                    },
                })?;
                debug!(
                    step = %self.name,
                    tool = %call.name,
                    call_id = %call.id,
                    is_error = result.is_error,
                    "Tool call finished"
                );
                out.push(result);
            }
            Ok(out)
        })
    }

    fn finalize(
        &self,
        state: &mut ConversationState,
        calls: Vec<ToolCall>,
        results: Vec<ToolResult>,
    ) -> Result<Action> {
        let dialog = state.channel_mut(&self.channel);
        for (call, result) in calls.iter().zip(results) {
            dialog.push(Message::tool_result(call, result));
        }
        Ok(Action::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use magnat_core::types::Role;
    use magnat_test_utils::FixtureTools;

    use crate::graph::{RunContext, StepRunner};

    fn state_with_calls(calls: Vec<ToolCall>) -> ConversationState {
        let mut state = ConversationState::seeded("question");
        state
            .dialog_mut()
            .push(Message::assistant_with_tools("", calls));
        state
    }

    #[tokio::test]
    async fn test_results_in_request_order() {
        // The first call is slower, so completion order differs from request order.
        let tools = FixtureTools::new()
            .with_delayed("slow", Duration::from_millis(30), "first")
            .with_result("fast", "second");
        let step = ToolStep::new("tools", Arc::new(tools));
        let mut state = state_with_calls(vec![
            ToolCall::new("c1", "slow", "{}"),
            ToolCall::new("c2", "fast", "{}"),
        ]);

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();

        assert_eq!(action, Action::Default);
        let tail: Vec<&Message> = state.dialog().iter().skip(2).collect();
        assert_eq!(tail.len(), 2);
        match (tail[0], tail[1]) {
            (
                Message::Tool {
                    tool_call_id: a,
                    content: ca,
                    ..
                },
                Message::Tool {
                    tool_call_id: b,
                    content: cb,
                    ..
                },
            ) => {
                assert_eq!((a.as_str(), ca.as_str()), ("c1", "first"));
                assert_eq!((b.as_str(), cb.as_str()), ("c2", "second"));
            }
            other => panic!("expected two tool messages, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let tools = FixtureTools::new().with_result("sum", "5");
        let step = ToolStep::new("tools", Arc::new(tools));
        let mut state = state_with_calls(vec![
            ToolCall::new("c1", "missing", "{}"),
            ToolCall::new("c2", "sum", "{}"),
        ]);

        step.run(&mut state, &RunContext::new()).await.unwrap();

        let msgs = state.dialog().messages();
        match &msgs[2] {
            Message::Tool { is_error, .. } => assert!(*is_error),
            other => panic!("expected tool message, got {:?}", other),
        }
        assert_eq!(msgs[3].content(), "5");
    }

    #[tokio::test]
    async fn test_transient_failure_fails_attempt() {
        let tools = FixtureTools::new().with_failure("flaky", "connection reset");
        let step = ToolStep::new("tools", Arc::new(tools.clone()))
            .with_retry(RetryPolicy::new(2, Duration::ZERO));
        let mut state = state_with_calls(vec![ToolCall::new("c1", "flaky", "{}")]);

        let err = step.run(&mut state, &RunContext::new()).await.unwrap_err();

        assert!(matches!(err, MagnatError::StepExhausted { attempts: 2, .. }));
        assert_eq!(tools.calls("flaky"), 2);
        assert!(state.dialog().iter().all(|m| m.role() != Role::Tool));
    }

    #[tokio::test]
    async fn test_no_pending_calls_is_noop() {
        let step = ToolStep::new("tools", Arc::new(FixtureTools::new()));
        let mut state = ConversationState::seeded("hello");

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();
        assert_eq!(action, Action::Default);
        assert_eq!(state.dialog().len(), 1);
    }
}
