pub mod graph;
pub mod pipeline;
pub mod steps;

pub use graph::{
    EdgeTable, Flow, FlowBuilder, FlowFailure, FlowOutcome, Node, RetryPolicy, RunContext, Step,
    StepId, StepRunner, Transition,
};
pub use pipeline::Collaborators;
pub use steps::{
    ClassifierStep, DebugStep, EchoStep, EmptyUserStep, ForwardStep, Generation, GenerationStep,
    GuardrailStep, IngestStep, ToolStep,
};
