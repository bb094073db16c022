use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::warn;

use magnat_core::config::RetryConfig;
use magnat_core::error::{MagnatError, Result};
use magnat_core::types::{Action, FlowEvent};
use magnat_core::ConversationState;

use super::executor::{Flow, RunContext};

/// Identity of a step inside one flow. Equal to the step's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How often and how patiently a step's execute phase is re-invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first, at least 1.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.wait())
    }
}

/// One unit of orchestration work.
///
/// The runner calls the phases strictly in order: `prepare` reads the state,
/// `execute` does the work (and is the only phase that is retried), and
/// `finalize` is the only phase allowed to mutate the state. The returned
/// [`Action`] selects the next step.
pub trait Step: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn prepare(&self, state: &ConversationState) -> Result<Self::Input>;

    fn execute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>>;

    fn finalize(
        &self,
        state: &mut ConversationState,
        input: Self::Input,
        output: Self::Output,
    ) -> Result<Action>;
}

/// Object-safe view of a [`Step`] that drives its full lifecycle.
pub trait StepRunner: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn run<'a>(
        &'a self,
        state: &'a mut ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<Action>>;
}

impl<S: Step> StepRunner for S {
    fn name(&self) -> &str {
        Step::name(self)
    }

    fn run<'a>(
        &'a self,
        state: &'a mut ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<Action>> {
        Box::pin(async move {
            let input = self.prepare(state)?;
            let output = execute_with_retry(self, &input, ctx).await?;
            self.finalize(state, input, output)
        })
    }
}

/// Run `execute` under the step's retry policy.
///
/// Non-transient errors surface immediately. Transient errors are retried
/// until the attempt budget is spent, then wrapped in `StepExhausted`.
async fn execute_with_retry<S: Step>(
    step: &S,
    input: &S::Input,
    ctx: &RunContext,
) -> Result<S::Output> {
    let policy = step.retry_policy();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match step.execute(input).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        if !err.is_transient() {
            return Err(err);
        }

        if attempt >= max_attempts {
            return Err(MagnatError::StepExhausted {
                step: Step::name(step).to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        warn!(
            step = Step::name(step),
            attempt,
            max_attempts,
            wait_ms = policy.wait.as_millis() as u64,
            error = %err,
            "Retrying step"
        );
        ctx.tracer.record(FlowEvent::StepRetried {
            run_id: ctx.run_id.clone(),
            step: Step::name(step).to_string(),
            attempt,
            error: err.to_string(),
        });

        if !policy.wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(policy.wait) => {}
                _ = ctx.cancel.cancelled() => return Err(MagnatError::Cancelled),
            }
        }
    }
}

/// A destination in a flow: a leaf step or a whole nested flow.
#[derive(Clone)]
pub enum Node {
    Step(Arc<dyn StepRunner>),
    Flow(Arc<Flow>),
}

impl Node {
    pub fn step(step: impl StepRunner) -> Self {
        Self::Step(Arc::new(step))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Step(step) => step.name(),
            Self::Flow(flow) => flow.name(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(step) => f.debug_tuple("Step").field(&step.name()).finish(),
            Self::Flow(flow) => f.debug_tuple("Flow").field(&flow.name()).finish(),
        }
    }
}

impl From<Flow> for Node {
    fn from(flow: Flow) -> Self {
        Self::Flow(Arc::new(flow))
    }
}

impl From<Arc<Flow>> for Node {
    fn from(flow: Arc<Flow>) -> Self {
        Self::Flow(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use magnat_core::Message;

    /// Fails the first `failures` executes with the given error factory.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        policy: RetryPolicy,
        transient: bool,
    }

    impl Flaky {
        fn new(failures: u32, policy: RetryPolicy) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                policy,
                transient: true,
            }
        }
    }

    impl Step for Flaky {
        type Input = ();
        type Output = String;

        fn name(&self) -> &str {
            "flaky"
        }

        fn retry_policy(&self) -> RetryPolicy {
            self.policy
        }

        fn prepare(&self, _state: &ConversationState) -> Result<()> {
            Ok(())
        }

        fn execute<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= self.failures {
                    if self.transient {
                        Err(MagnatError::LlmRequest(format!("HTTP 503 on call {}", n)))
                    } else {
                        Err(MagnatError::ContractViolation {
                            step: "flaky".into(),
                            message: "bad shape".into(),
                        })
                    }
                } else {
                    Ok(format!("ok after {}", n))
                }
            })
        }

        fn finalize(
            &self,
            state: &mut ConversationState,
            _input: (),
            output: String,
        ) -> Result<Action> {
            state.dialog_mut().push(Message::assistant(output));
            Ok(Action::Default)
        }
    }

    #[test]
    fn test_policy_clamps_attempts() {
        let policy = RetryPolicy::new(0, Duration::from_millis(5));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default(), RetryPolicy::once());
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 4,
            wait_ms: 250,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.wait, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let step = Flaky::new(2, RetryPolicy::new(3, Duration::ZERO));
        let mut state = ConversationState::new();
        let ctx = RunContext::new();

        let action = step.run(&mut state, &ctx).await.unwrap();
        assert_eq!(action, Action::Default);
        assert_eq!(step.calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.dialog().last().unwrap().content(), "ok after 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exact_attempts() {
        let wait = Duration::from_secs(10);
        let step = Flaky::new(u32::MAX, RetryPolicy::new(4, wait));
        let mut state = ConversationState::new();
        let ctx = RunContext::new();

        let started = tokio::time::Instant::now();
        let err = step.run(&mut state, &ctx).await.unwrap_err();

        assert_eq!(step.calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= wait * 3);
        match err {
            MagnatError::StepExhausted { step, attempts, .. } => {
                assert_eq!(step, "flaky");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected StepExhausted, got {:?}", other),
        }
        // finalize never ran
        assert!(state.dialog().is_empty());
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let mut step = Flaky::new(5, RetryPolicy::new(5, Duration::ZERO));
        step.transient = false;
        let mut state = ConversationState::new();

        let err = step.run(&mut state, &RunContext::new()).await.unwrap_err();
        assert!(matches!(err, MagnatError::ContractViolation { .. }));
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_retry_wait() {
        let step = Flaky::new(u32::MAX, RetryPolicy::new(3, Duration::from_secs(3600)));
        let mut state = ConversationState::new();
        let ctx = RunContext::new();
        let cancel = ctx.cancel.clone();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let err = step.run(&mut state, &ctx).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, MagnatError::Cancelled));
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    }
}
