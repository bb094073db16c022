//! Step graph engine.
//!
//! A `Flow` is a directed, possibly cyclic graph of `Node`s. Each node is a
//! leaf `Step` (prepare / execute / finalize) or a nested `Flow`. After a step
//! finalizes, its outcome `Action` is looked up in the `EdgeTable` under
//! `(step, action)`; a hit names the next step, a miss ends the run.
//!
//! Every step of a run, nested flows included, reads and writes one shared
//! `ConversationState`.

pub mod edge;
pub mod executor;
pub mod node;

pub use edge::EdgeTable;
pub use executor::{Flow, FlowBuilder, FlowFailure, FlowOutcome, RunContext, Transition};
pub use node::{Node, RetryPolicy, Step, StepId, StepRunner};
