pub mod builtin;
pub mod documents;
pub mod prompts;
pub mod registry;

pub use builtin::search::SearchDocumentsTool;
pub use builtin::sum::SumTool;
pub use documents::MemoryDocumentStore;
pub use prompts::FilePromptStore;
pub use registry::ToolRegistry;
