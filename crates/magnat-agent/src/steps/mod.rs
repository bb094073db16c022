//! Concrete step family wired into conversation graphs.

pub mod classifier;
pub mod debug;
pub mod echo;
pub mod empty_user;
pub mod forward;
pub mod generation;
pub mod guardrail;
pub mod ingest;
pub mod tool;

pub use classifier::ClassifierStep;
pub use debug::DebugStep;
pub use echo::EchoStep;
pub use empty_user::EmptyUserStep;
pub use forward::ForwardStep;
pub use generation::{Generation, GenerationStep};
pub use guardrail::{GuardrailStep, AUDIT_CHANNEL};
pub use ingest::{IngestStep, Ingested};
pub use tool::ToolStep;
