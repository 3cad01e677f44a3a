/// Petgraph-based control-flow graph of a flow
///
/// Converts a flow definition into a directed graph (steps as nodes, branches
/// as edge weights), validates its structure and answers "which step comes
/// after this branch" during execution. Unlike a pure DAG, flows may loop.

use crate::assistant::types::{
    Agent, Assistant, Flow, ParallelPolicy, Step, StepKind, ToolKind, DEFAULT_BRANCH, NEXT_BRANCH,
};
use crate::error::{Result, WayflowError};
use crate::tools::template::check_template_safety;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// Compiled control-flow graph borrowing the flow definition
#[derive(Debug)]
pub struct FlowGraph<'a> {
    flow: &'a Flow,
    graph: DiGraph<&'a str, &'a str>,
    index_of: HashMap<&'a str, NodeIndex>,
    transitions: HashMap<(&'a str, &'a str), &'a str>,
}

fn invalid(flow: &Flow, reason: impl Into<String>) -> WayflowError {
    WayflowError::InvalidDefinition {
        component: flow.id.clone(),
        reason: reason.into(),
    }
}

/// Outgoing branches a step can take
pub fn step_branches(step: &Step) -> Vec<String> {
    match &step.kind {
        StepKind::Complete => Vec::new(),
        StepKind::Branching { branches } => {
            let mut names: Vec<String> = branches.values().cloned().collect();
            names.push(DEFAULT_BRANCH.to_string());
            names.sort();
            names.dedup();
            names
        }
        _ => vec![NEXT_BRANCH.to_string()],
    }
}

impl<'a> FlowGraph<'a> {
    /// Build and validate the graph of a single flow (nested flows excluded)
    pub fn build(flow: &'a Flow) -> Result<Self> {
        tracing::debug!("🏗️ Building control-flow graph for '{}'", flow.id);

        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for step in &flow.steps {
            if index_of.contains_key(step.name.as_str()) {
                return Err(invalid(flow, format!("duplicate step name '{}'", step.name)));
            }
            let index = graph.add_node(step.name.as_str());
            index_of.insert(step.name.as_str(), index);
        }

        let start = flow
            .step(&flow.start_step)
            .ok_or_else(|| invalid(flow, format!("start step '{}' not found", flow.start_step)))?;
        if !matches!(start.kind, StepKind::Start { .. }) {
            return Err(invalid(flow, format!("start step '{}' is not a start step", start.name)));
        }
        if let Some(extra) = flow
            .steps
            .iter()
            .find(|s| matches!(s.kind, StepKind::Start { .. }) && s.name != flow.start_step)
        {
            return Err(invalid(flow, format!("second start step '{}'", extra.name)));
        }

        let mut transitions = HashMap::new();
        for edge in &flow.control_flow_edges {
            let from = *index_of
                .get(edge.source_step.as_str())
                .ok_or_else(|| invalid(flow, format!("edge references unknown step '{}'", edge.source_step)))?;
            let to = *index_of
                .get(edge.destination_step.as_str())
                .ok_or_else(|| invalid(flow, format!("edge references unknown step '{}'", edge.destination_step)))?;

            let source = flow.step(&edge.source_step).ok_or_else(|| {
                invalid(flow, format!("edge references unknown step '{}'", edge.source_step))
            })?;
            if !step_branches(source).contains(&edge.source_branch) {
                return Err(invalid(
                    flow,
                    format!("step '{}' has no branch '{}'", source.name, edge.source_branch),
                ));
            }

            let key = (edge.source_step.as_str(), edge.source_branch.as_str());
            if transitions.insert(key, edge.destination_step.as_str()).is_some() {
                return Err(invalid(
                    flow,
                    format!("branch '{}' of step '{}' is wired twice", key.1, key.0),
                ));
            }
            graph.add_edge(from, to, edge.source_branch.as_str());
            tracing::debug!("  🔗 {} --{}--> {}", edge.source_step, edge.source_branch, edge.destination_step);
        }

        let compiled = Self {
            flow,
            graph,
            index_of,
            transitions,
        };
        compiled.check_reachability()?;
        Ok(compiled)
    }

    /// Steps reachable from the start step (breadth-first)
    fn reachable_from_start(&self) -> HashSet<NodeIndex> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(&start) = self.index_of.get(self.flow.start_step.as_str()) {
            reachable.insert(start);
            queue.push_back(start);
        }

        while let Some(current) = queue.pop_front() {
            for target in self.graph.neighbors(current) {
                if reachable.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        reachable
    }

    fn check_reachability(&self) -> Result<()> {
        let reachable = self.reachable_from_start();
        let mut completes = 0;

        for step in &self.flow.steps {
            let index = self.index_of[step.name.as_str()];
            if !reachable.contains(&index) {
                tracing::warn!("⚠️ Step '{}' of flow '{}' is unreachable", step.name, self.flow.id);
                continue;
            }
            if matches!(step.kind, StepKind::Complete) {
                completes += 1;
                continue;
            }
            for branch in step_branches(step) {
                if !self.transitions.contains_key(&(step.name.as_str(), branch.as_str())) {
                    return Err(invalid(
                        self.flow,
                        format!("branch '{}' of step '{}' is not connected", branch, step.name),
                    ));
                }
            }
        }

        if completes == 0 {
            return Err(invalid(self.flow, "no complete step is reachable from the start step"));
        }
        Ok(())
    }

    pub fn step(&self, name: &str) -> Result<&'a Step> {
        self.flow
            .step(name)
            .ok_or_else(|| invalid(self.flow, format!("unknown step '{}'", name)))
    }

    /// Destination of `branch` leaving `step`
    pub fn next_step(&self, step: &str, branch: &str) -> Result<&'a str> {
        self.transitions
            .get(&(step, branch))
            .copied()
            .ok_or_else(|| invalid(self.flow, format!("branch '{}' of step '{}' is not connected", branch, step)))
    }
}

/// How safely a sub-flow can run in a parallel map step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParallelTier {
    /// No observable side effects
    ParallelSafe,
    /// Side effects land in completion order; outputs keep item order
    SideEffectTolerant,
    /// May suspend the conversation; cannot run in parallel
    Unsupported,
}

/// Classify a flow by the most restrictive step it contains
pub fn classify_flow(flow: &Flow) -> ParallelTier {
    flow.steps
        .iter()
        .map(|step| match &step.kind {
            StepKind::InputMessage { .. } | StepKind::AgentExecution { .. } => ParallelTier::Unsupported,
            StepKind::ToolExecution { tool } => match tool.kind {
                ToolKind::Client => ParallelTier::Unsupported,
                ToolKind::Server { .. } => ParallelTier::SideEffectTolerant,
            },
            StepKind::OutputMessage { .. }
            | StepKind::PromptExecution { .. }
            | StepKind::ApiCall { .. } => ParallelTier::SideEffectTolerant,
            StepKind::FlowExecution { flow } => classify_flow(flow),
            StepKind::Map { flow, .. } => classify_flow(flow),
            StepKind::Start { .. }
            | StepKind::Complete
            | StepKind::Branching { .. }
            | StepKind::TemplateRendering { .. }
            | StepKind::ExtractValueFromJson { .. } => ParallelTier::ParallelSafe,
        })
        .max()
        .unwrap_or(ParallelTier::ParallelSafe)
}

/// Validate an assistant and everything nested in it
pub fn validate_assistant(assistant: &Assistant) -> Result<()> {
    match assistant {
        Assistant::Agent(agent) => validate_agent(agent),
        Assistant::Flow(flow) => validate_flow(flow),
    }
}

pub fn validate_agent(agent: &Agent) -> Result<()> {
    check_template_safety(&agent.system_prompt)?;
    if let Some(message) = &agent.initial_message {
        check_template_safety(message)?;
    }
    let mut seen = HashSet::new();
    for tool in &agent.tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(WayflowError::InvalidDefinition {
                component: agent.id.clone(),
                reason: format!("duplicate tool '{}'", tool.name),
            });
        }
        if tool.name == crate::tools::SUBMIT_RESULT_TOOL {
            return Err(WayflowError::InvalidDefinition {
                component: agent.id.clone(),
                reason: format!("tool name '{}' is reserved", tool.name),
            });
        }
    }
    if agent.max_iterations == 0 {
        return Err(WayflowError::InvalidDefinition {
            component: agent.id.clone(),
            reason: "max_iterations must be at least 1".to_string(),
        });
    }
    Ok(())
}

pub fn validate_flow(flow: &Flow) -> Result<()> {
    FlowGraph::build(flow)?;

    for step in &flow.steps {
        match &step.kind {
            StepKind::OutputMessage { message } => check_template_safety(message)?,
            StepKind::InputMessage { message: Some(message) } => check_template_safety(message)?,
            StepKind::PromptExecution { prompt, .. } => check_template_safety(prompt)?,
            StepKind::TemplateRendering { template } => check_template_safety(template)?,
            StepKind::ApiCall { url, headers, body, .. } => {
                check_template_safety(url)?;
                for value in headers.values() {
                    check_template_safety(value)?;
                }
                if let Some(body) = body {
                    check_template_safety(body)?;
                }
            }
            StepKind::AgentExecution { agent } => validate_agent(agent)?,
            StepKind::FlowExecution { flow } => validate_flow(flow)?,
            StepKind::Map { flow: sub_flow, parallel, .. } => {
                validate_flow(sub_flow)?;
                if let ParallelPolicy::Parallel { max_workers } = parallel {
                    if *max_workers == 0 {
                        return Err(invalid(flow, format!("map step '{}' needs max_workers >= 1", step.name)));
                    }
                    if classify_flow(sub_flow) == ParallelTier::Unsupported {
                        return Err(invalid(
                            flow,
                            format!("map step '{}' runs a sub-flow that may suspend in parallel", step.name),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    tracing::debug!("✅ Flow '{}' validated", flow.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::types::{ControlFlowEdge, Property, Tool};

    fn linear_flow() -> Flow {
        Flow {
            id: "linear".into(),
            name: "Linear".into(),
            description: String::new(),
            start_step: "start".into(),
            steps: vec![
                Step::new("start", StepKind::Start { inputs: vec![] }),
                Step::new("say", StepKind::OutputMessage { message: "hi".into() }),
                Step::new("end", StepKind::Complete),
            ],
            control_flow_edges: vec![
                ControlFlowEdge::new("start", "say"),
                ControlFlowEdge::new("say", "end"),
            ],
            outputs: vec![],
        }
    }

    #[test]
    fn linear_flow_compiles() {
        let flow = linear_flow();
        let graph = FlowGraph::build(&flow).unwrap();
        assert_eq!(graph.next_step("start", NEXT_BRANCH).unwrap(), "say");
        assert_eq!(graph.step("end").unwrap().name, "end");
    }

    #[test]
    fn unconnected_branch_is_invalid() {
        let mut flow = linear_flow();
        flow.control_flow_edges.pop();
        let err = FlowGraph::build(&flow).unwrap_err();
        assert!(err.to_string().contains("not connected"), "{err}");
    }

    #[test]
    fn unknown_branch_and_step_are_invalid() {
        let mut flow = linear_flow();
        flow.control_flow_edges.push(ControlFlowEdge::branch("say", "yes", "end"));
        assert!(FlowGraph::build(&flow).is_err());

        let mut flow = linear_flow();
        flow.control_flow_edges.push(ControlFlowEdge::new("ghost", "end"));
        assert!(FlowGraph::build(&flow).is_err());
    }

    #[test]
    fn loops_are_allowed_when_complete_is_reachable() {
        let mut flow = linear_flow();
        flow.steps.insert(
            2,
            Step::new(
                "route",
                StepKind::Branching {
                    branches: [("again".to_string(), "loop".to_string())].into_iter().collect(),
                },
            ),
        );
        flow.control_flow_edges = vec![
            ControlFlowEdge::new("start", "say"),
            ControlFlowEdge::new("say", "route"),
            ControlFlowEdge::branch("route", "loop", "say"),
            ControlFlowEdge::branch("route", DEFAULT_BRANCH, "end"),
        ];
        assert!(FlowGraph::build(&flow).is_ok());
    }

    #[test]
    fn flow_without_reachable_complete_is_invalid() {
        let mut flow = linear_flow();
        flow.control_flow_edges = vec![
            ControlFlowEdge::new("start", "say"),
            ControlFlowEdge::new("say", "say"),
        ];
        let err = FlowGraph::build(&flow).unwrap_err();
        assert!(err.to_string().contains("no complete step"), "{err}");
    }

    #[test]
    fn classify_tiers() {
        let safe = linear_flow();
        assert_eq!(classify_flow(&safe), ParallelTier::SideEffectTolerant);

        let mut suspending = linear_flow();
        suspending.steps[1] = Step::new(
            "say",
            StepKind::ToolExecution {
                tool: Tool {
                    name: "ask".into(),
                    description: String::new(),
                    parameters: vec![Property::string("q")],
                    kind: ToolKind::Client,
                },
            },
        );
        assert_eq!(classify_flow(&suspending), ParallelTier::Unsupported);

        let mut pure = linear_flow();
        pure.steps[1] = Step::new("say", StepKind::TemplateRendering { template: "x".into() });
        assert_eq!(classify_flow(&pure), ParallelTier::ParallelSafe);
    }

    #[test]
    fn parallel_map_over_suspending_flow_is_rejected() {
        let mut inner = linear_flow();
        inner.steps[1] = Step::new("say", StepKind::InputMessage { message: None });

        let mut outer = linear_flow();
        outer.steps[1] = Step::new(
            "say",
            StepKind::Map {
                flow: Box::new(inner.clone()),
                unpack_input: Default::default(),
                parallel: ParallelPolicy::Parallel { max_workers: 4 },
            },
        );
        assert!(validate_flow(&outer).is_err());

        outer.steps[1] = Step::new(
            "say",
            StepKind::Map {
                flow: Box::new(inner),
                unpack_input: Default::default(),
                parallel: ParallelPolicy::Sequential,
            },
        );
        assert!(validate_flow(&outer).is_ok());
    }

    #[test]
    fn unsafe_template_fails_validation() {
        let mut flow = linear_flow();
        flow.steps[1] = Step::new("say", StepKind::OutputMessage { message: "{{> evil}}".into() });
        assert!(matches!(validate_flow(&flow), Err(WayflowError::UnsafeTemplate(_))));
    }
}
