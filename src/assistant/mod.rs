/// Assistant management layer
///
/// Definitions of agents and flows, their input/output descriptors,
/// JSON/YAML import and export, SQLite storage and the hot-reload registry.

pub mod descriptors;
pub mod loader;
pub mod registry;
pub mod storage;
pub mod types;

pub use registry::AssistantRegistry;
pub use storage::AssistantStorage;
pub use types::{
    Agent, Assistant, CallerInputMode, ControlFlowEdge, Flow, ParallelPolicy, Property, Step,
    StepKind, Tool, ToolKind, ValueType,
};
