//! The tabletop-rules assistant graph.
//!
//! ```text
//! security --unsafe--> refusal
//!    |safe
//! classifier --general--> assistant <--default-- tools
//!    |                        |tools------------->^
//!    |explanation, clarification --> expert (sub-flow)
//!    |adding --> ingest
//! ```
//!
//! The expert sub-flow holds its own conversation on the `expert_1` channel:
//! `intake -> splitter -> nudge -> expert <-> expert_tools`, then `handoff`
//! copies the expert's answer back to the main dialog.

use std::sync::Arc;

use magnat_core::config::AppConfig;
use magnat_core::error::Result;
use magnat_core::traits::{DocumentStore, LlmClient, PromptProvider, ToolService};
use magnat_core::types::Action;
use magnat_core::MAIN_CHANNEL;

use crate::graph::{Flow, RetryPolicy};
use crate::steps::{
    ClassifierStep, EchoStep, EmptyUserStep, ForwardStep, Generation, GenerationStep,
    GuardrailStep, IngestStep, ToolStep,
};

/// Prompt names looked up in the prompt store.
pub mod prompts {
    pub const SECURITY: &str = "security";
    pub const TASK_CLASSIFIER: &str = "task_classifier";
    pub const TASK_SPLITTER: &str = "task_splitter";
    pub const MAIN: &str = "main";
    pub const EXPERT: &str = "expert_1";

    pub const ALL: [&str; 5] = [SECURITY, TASK_CLASSIFIER, TASK_SPLITTER, MAIN, EXPERT];
}

/// Classification labels.
pub mod tasks {
    pub const GENERAL: &str = "general";
    pub const EXPLANATION: &str = "explanation";
    pub const CLARIFICATION: &str = "clarification";
    pub const ADDING: &str = "adding";

    pub const ALL: [&str; 4] = [GENERAL, EXPLANATION, CLARIFICATION, ADDING];
}

pub const MAIN_FLOW: &str = "tabletop";
pub const EXPERT_FLOW: &str = "expert";
pub const EXPERT_CHANNEL: &str = "expert_1";

/// External services the graph talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<dyn PromptProvider>,
    pub tools: Arc<dyn ToolService>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Collaborators {
    fn generation(&self, prompt: &str, model: &str) -> Generation {
        Generation::new(prompt, self.llm.clone(), self.prompts.clone()).with_model(model)
    }
}

/// Expert sub-conversation for explanation and clarification requests.
pub fn expert_flow(c: &Collaborators, config: &AppConfig) -> Result<Flow> {
    let retry = RetryPolicy::from(&config.flow.retry);
    let tool_retry = RetryPolicy::from(&config.flow.tool_retry);
    let model = config.experts_model();

    let mut b = Flow::builder(EXPERT_FLOW);
    let intake = b.add_step(ForwardStep::user_turn("intake", MAIN_CHANNEL, EXPERT_CHANNEL))?;
    let splitter = b.add_step(
        GenerationStep::new("splitter", c.generation(prompts::TASK_SPLITTER, model))
            .on_channel(EXPERT_CHANNEL)
            .with_retry(retry),
    )?;
    let nudge = b.add_step(EmptyUserStep::new("nudge").on_channel(EXPERT_CHANNEL))?;
    let expert = b.add_step(
        GenerationStep::new(
            "expert",
            c.generation(prompts::EXPERT, model).with_tools(c.tools.clone()),
        )
        .on_channel(EXPERT_CHANNEL)
        .with_retry(retry),
    )?;
    let expert_tools = b.add_step(
        ToolStep::new("expert_tools", c.tools.clone())
            .on_channel(EXPERT_CHANNEL)
            .with_retry(tool_retry),
    )?;
    let handoff = b.add_step(ForwardStep::new("handoff", EXPERT_CHANNEL, MAIN_CHANNEL))?;

    b.then(&intake, &splitter)?;
    b.then(&splitter, &nudge)?;
    b.then(&nudge, &expert)?;
    b.connect(&expert, Action::Tools, &expert_tools)?;
    b.then(&expert_tools, &expert)?;
    b.then(&expert, &handoff)?;

    b.start(&intake);
    if let Some(max) = config.flow.step_budget() {
        b.max_steps(max);
    }
    b.build()
}

/// Top-level graph: guardrail, classifier, and one branch per task.
pub fn main_flow(c: &Collaborators, config: &AppConfig) -> Result<Flow> {
    let retry = RetryPolicy::from(&config.flow.retry);
    let tool_retry = RetryPolicy::from(&config.flow.tool_retry);

    let mut b = Flow::builder(MAIN_FLOW);
    let security = b.add_step(
        GuardrailStep::new(
            "security",
            c.generation(prompts::SECURITY, config.security_model()),
        )
        .with_retry(retry),
    )?;
    let refusal = b.add_step(EchoStep::new("refusal", config.messages.refusal.clone()))?;
    let classifier = b.add_step(
        ClassifierStep::new(
            "classifier",
            c.generation(prompts::TASK_CLASSIFIER, config.general_model()),
            tasks::ALL,
        )
        .with_retry(retry),
    )?;
    let assistant = b.add_step(
        GenerationStep::new(
            "assistant",
            c.generation(prompts::MAIN, config.general_model())
                .with_tools(c.tools.clone()),
        )
        .with_retry(retry),
    )?;
    let tools = b.add_step(ToolStep::new("tools", c.tools.clone()).with_retry(tool_retry))?;
    let ingest = b.add_step(
        IngestStep::new("ingest", c.documents.clone())
            .with_ack_template(config.messages.ingest_ack.clone())
            .with_failure_template(config.messages.ingest_failed.clone())
            .with_retry(retry),
    )?;
    let expert = b.add_flow(expert_flow(c, config)?)?;

    b.connect(&security, Action::Unsafe, &refusal)?;
    b.connect(&security, Action::Safe, &classifier)?;
    b.connect(&classifier, tasks::GENERAL, &assistant)?;
    b.connect(&classifier, tasks::EXPLANATION, &expert)?;
    b.connect(&classifier, tasks::CLARIFICATION, &expert)?;
    b.connect(&classifier, tasks::ADDING, &ingest)?;
    b.connect(&assistant, Action::Tools, &tools)?;
    b.then(&tools, &assistant)?;

    b.start(&security);
    if let Some(max) = config.flow.step_budget() {
        b.max_steps(max);
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnat_test_utils::{FixtureTools, RecordingStore, ScriptedLlm, StaticPrompts};

    fn collaborators() -> Collaborators {
        Collaborators {
            llm: Arc::new(ScriptedLlm::new(vec![])),
            prompts: Arc::new(StaticPrompts::new()),
            tools: Arc::new(FixtureTools::new()),
            documents: Arc::new(RecordingStore::new("doc", 1)),
        }
    }

    fn config() -> AppConfig {
        AppConfig::parse("[model]\nmodel_id = \"test\"\n").unwrap()
    }

    #[test]
    fn test_main_flow_wiring() {
        let flow = main_flow(&collaborators(), &config()).unwrap();
        assert_eq!(flow.start().as_str(), "security");
        assert_eq!(flow.max_steps(), Some(64));
        assert!(flow.contains_flow(EXPERT_FLOW));

        let routes: Vec<(String, String, String)> = flow
            .edges()
            .iter()
            .map(|(from, label, to)| (from.to_string(), label.to_string(), to.to_string()))
            .collect();
        assert!(routes.contains(&("security".into(), "unsafe".into(), "refusal".into())));
        assert!(routes.contains(&("classifier".into(), "adding".into(), "ingest".into())));
        assert!(routes.contains(&("tools".into(), "default".into(), "assistant".into())));
        assert_eq!(routes.len(), 8);
    }

    #[test]
    fn test_unsafe_only_reaches_refusal() {
        let flow = main_flow(&collaborators(), &config()).unwrap();
        let unsafe_targets: Vec<String> = flow
            .edges()
            .iter()
            .filter(|(_, label, _)| **label == Action::Unsafe)
            .map(|(_, _, to)| to.to_string())
            .collect();
        assert_eq!(unsafe_targets, vec!["refusal".to_string()]);
    }

    #[test]
    fn test_budget_disabled_by_zero() {
        let mut config = config();
        config.flow.max_steps = 0;
        let flow = expert_flow(&collaborators(), &config).unwrap();
        assert_eq!(flow.max_steps(), None);
        assert_eq!(flow.start().as_str(), "intake");
    }
}
