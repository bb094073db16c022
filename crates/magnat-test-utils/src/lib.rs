//! Scripted collaborators and fixtures shared by Magnat tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::{DocumentStore, LlmClient, PromptProvider, ToolService, Tracer};
use magnat_core::types::{
    FlowEvent, GenerationRequest, IngestReceipt, Message, ToolDefinition, ToolResult,
};

// ── Generation ──────────────────────────────────────────────────

/// Generation collaborator that replays a fixed script of answers.
///
/// Once the script runs out every call fails with a transient
/// `LlmRequest` error, which makes retry exhaustion easy to provoke.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<Message>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<Message>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Message>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MagnatError::LlmRequest(format!("script exhausted at call {}", n))))
        })
    }
}

/// Structured classifier answer.
pub fn classification(task: &str, content: &str) -> Message {
    Message::assistant("")
        .with_metadata("task", json!(task))
        .with_metadata("content", json!(content))
}

/// Structured guardrail answer.
pub fn verdict(verdict: &str, reason: &str) -> Message {
    Message::assistant("")
        .with_metadata("verdict", json!(verdict))
        .with_metadata("reason", json!(reason))
}

// ── Prompts ─────────────────────────────────────────────────────

/// In-memory prompt store.
#[derive(Default)]
pub struct StaticPrompts {
    prompts: Mutex<HashMap<String, String>>,
    lookups: AtomicUsize,
}

impl StaticPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, text: &str) -> Self {
        self.set(name, text);
        self
    }

    /// Same text for every name.
    pub fn uniform(names: &[&str], text: &str) -> Self {
        names.iter().fold(Self::new(), |p, n| p.with(n, text))
    }

    /// Replace a prompt between runs.
    pub fn set(&self, name: &str, text: &str) {
        self.prompts
            .lock()
            .unwrap()
            .insert(name.to_string(), text.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl PromptProvider for StaticPrompts {
    fn prompt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| MagnatError::PromptNotFound(name.to_string()))
        })
    }
}

/// Write `<name>.md` files into a fresh temp dir.
pub fn temp_prompts(prompts: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, text) in prompts {
        write_file(dir.path(), &format!("{}.md", name), text);
    }
    dir
}

pub fn write_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

// ── Tools ───────────────────────────────────────────────────────

#[derive(Clone)]
enum Fixture {
    Result { content: String, delay: Duration },
    Failure(String),
}

#[derive(Default)]
struct FixtureInner {
    fixtures: Mutex<HashMap<String, Fixture>>,
    calls: Mutex<HashMap<String, usize>>,
}

/// Tool service answering from canned fixtures. Clones share fixtures and
/// call counts.
#[derive(Clone, Default)]
pub struct FixtureTools {
    inner: Arc<FixtureInner>,
}

impl FixtureTools {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_fixture(self, name: &str, fixture: Fixture) -> Self {
        self.inner
            .fixtures
            .lock()
            .unwrap()
            .insert(name.to_string(), fixture);
        self
    }

    pub fn with_result(self, name: &str, content: &str) -> Self {
        self.with_delayed(name, Duration::ZERO, content)
    }

    pub fn with_delayed(self, name: &str, delay: Duration, content: &str) -> Self {
        self.with_fixture(
            name,
            Fixture::Result {
                content: content.to_string(),
                delay,
            },
        )
    }

    /// Tool that always fails with a transient execution error.
    pub fn with_failure(self, name: &str, message: &str) -> Self {
        self.with_fixture(name, Fixture::Failure(message.to_string()))
    }

    pub fn calls(&self, name: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl ToolService for FixtureTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .inner
            .fixtures
            .lock()
            .unwrap()
            .keys()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("fixture tool {}", name),
                input_schema: json!({"type": "object"}),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn call<'a>(&'a self, name: &'a str, _arguments: &'a str) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            *self
                .inner
                .calls
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default() += 1;

            let fixture = self
                .inner
                .fixtures
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| MagnatError::ToolNotFound(name.to_string()))?;
            match fixture {
                Fixture::Result { content, delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(ToolResult::success(content))
                }
                Fixture::Failure(message) => Err(MagnatError::ToolExecution {
                    tool: name.to_string(),
                    message,
                }),
            }
        })
    }
}

// ── Documents ───────────────────────────────────────────────────

/// Document store that records sources and returns a fixed receipt.
pub struct RecordingStore {
    title: String,
    chunks: usize,
    sources: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<MagnatError>>,
}

impl RecordingStore {
    pub fn new(title: &str, chunks: usize) -> Self {
        Self {
            title: title.to_string(),
            chunks,
            sources: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next ingest calls with `error`, one per call, before succeeding.
    pub fn failing_with(self, error: MagnatError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    /// Every source passed to `ingest`, failed attempts included.
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

impl DocumentStore for RecordingStore {
    fn ingest<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<IngestReceipt>> {
        Box::pin(async move {
            self.sources.lock().unwrap().push(source.to_string());
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            Ok(IngestReceipt {
                source: source.to_string(),
                title: Some(self.title.clone()),
                chunks: self.chunks,
            })
        })
    }
}

// ── Tracing ─────────────────────────────────────────────────────

/// Tracer that keeps every event.
#[derive(Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<FlowEvent>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of steps that finished, in order.
    pub fn finished_steps(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FlowEvent::StepFinished { step, .. } => Some(step),
                _ => None,
            })
            .collect()
    }

    pub fn retries(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, FlowEvent::StepRetried { .. }))
            .count()
    }
}

impl Tracer for RecordingTracer {
    fn record(&self, event: FlowEvent) {
        self.events.lock().unwrap().push(event);
    }
}
