/// Runtime Execution Engine
///
/// - Flow validation and navigation on a petgraph control-flow graph
/// - The agent loop (model calls, tool dispatch, submission)
/// - Leaf step handlers
/// - Suspension and resumption of nested flows, agents and map steps

mod agent;

pub mod engine;
pub mod executor;
pub mod graph;

pub use engine::ExecutionEngine;
pub use executor::StepOutcome;
pub use graph::{classify_flow, validate_assistant, FlowGraph, ParallelTier};
