/// Core assistant type definitions
///
/// Agents and Flows are described declaratively (Agent-Spec style) and are
/// serialized/deserialized from JSON or YAML for persistence and export.

use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Anything a conversation can be started on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "component_type")]
pub enum Assistant {
    Agent(Agent),
    Flow(Flow),
}

impl Assistant {
    pub fn id(&self) -> &str {
        match self {
            Assistant::Agent(agent) => &agent.id,
            Assistant::Flow(flow) => &flow.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Assistant::Agent(agent) => &agent.name,
            Assistant::Flow(flow) => &flow.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Assistant::Agent(_) => "Agent",
            Assistant::Flow(_) => "Flow",
        }
    }
}

/// JSON type of a described value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl ValueType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Object => value.is_object(),
            ValueType::Array => value.is_array(),
            ValueType::Any => true,
        }
    }

    /// Name of the JSON type of an arbitrary value (for error messages)
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "any".to_string());
        f.write_str(&name)
    }
}

/// Descriptor of a named input or output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    /// Properties with a default are optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Property {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            value_type,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::String)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A callable capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<Property>,
    #[serde(flatten)]
    pub kind: ToolKind,
}

/// Where a tool runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool_type", rename_all = "snake_case")]
pub enum ToolKind {
    /// Executed by the runtime as a sandboxed Lua script.
    /// The script sees its arguments as the global `args` table.
    Server { script: String },
    /// Executed by the caller; surfaces as a `ToolRequest` status
    Client,
}

impl Tool {
    pub fn is_client(&self) -> bool {
        matches!(self.kind, ToolKind::Client)
    }
}

/// Whether an agent hands control back to the caller after answering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerInputMode {
    #[default]
    Always,
    Never,
}

/// LLM-driven conversational component that plans and invokes tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub llm: LlmConfig,
    /// Handlebars template rendered with the agent inputs
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Explicit inputs; when empty they are derived from the prompt template
    #[serde(default)]
    pub inputs: Vec<Property>,
    /// Values the agent must submit (through `submit_result`) to finish
    #[serde(default)]
    pub outputs: Vec<Property>,
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub caller_input_mode: CallerInputMode,
}

fn default_max_iterations() -> u32 {
    10
}

/// Step-graph-based structured assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Name of the `start` step
    pub start_step: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub control_flow_edges: Vec<ControlFlowEdge>,
    /// Values returned on completion; empty means the whole value store
    #[serde(default)]
    pub outputs: Vec<Property>,
}

impl Flow {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// A node of the flow's control-flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Step input name -> value store key
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_mapping: HashMap<String, String>,
    /// Step output name -> value store key
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output_mapping: HashMap<String, String>,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
        }
    }

    /// Value store key a step input is read from
    pub fn input_key<'a>(&'a self, input: &'a str) -> &'a str {
        self.input_mapping.get(input).map(String::as_str).unwrap_or(input)
    }

    /// Value store key a step output is written to
    pub fn output_key<'a>(&'a self, output: &'a str) -> &'a str {
        self.output_mapping.get(output).map(String::as_str).unwrap_or(output)
    }
}

/// Behaviour of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    /// Entry point; exposes the flow inputs
    Start {
        #[serde(default)]
        inputs: Vec<Property>,
    },
    /// Terminal step
    Complete,
    /// Posts a rendered agent message
    OutputMessage { message: String },
    /// Optionally posts a message, then waits for the user
    InputMessage {
        #[serde(default)]
        message: Option<String>,
    },
    /// Runs a server tool inline or asks the caller to run a client tool
    ToolExecution { tool: Tool },
    /// Single model call on a rendered prompt
    PromptExecution { prompt: String, llm: LlmConfig },
    /// Runs an agent sharing the conversation history
    AgentExecution { agent: Box<Agent> },
    /// Runs a nested flow
    FlowExecution { flow: Box<Flow> },
    /// Picks the outgoing branch from the `next_step_name` input
    Branching {
        /// Input value -> branch name; unmatched values take `default`
        branches: HashMap<String, String>,
    },
    TemplateRendering { template: String },
    /// Extracts values from the JSON `text` input (output name -> JSONPath)
    ExtractValueFromJson { outputs: HashMap<String, String> },
    /// Runs a sub-flow once per element of the `iterated_input` array
    Map {
        flow: Box<Flow>,
        /// Sub-flow input name -> JSONPath into the item; empty passes the item as `item`
        #[serde(default)]
        unpack_input: HashMap<String, String>,
        #[serde(default)]
        parallel: ParallelPolicy,
    },
    /// HTTP call with templated url and body
    ApiCall {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

/// Concurrency of a map step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    #[default]
    Sequential,
    Parallel { max_workers: usize },
}

/// Connection between a step branch and the next step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFlowEdge {
    pub source_step: String,
    #[serde(default = "default_branch")]
    pub source_branch: String,
    pub destination_step: String,
}

pub const NEXT_BRANCH: &str = "next";
pub const DEFAULT_BRANCH: &str = "default";

fn default_branch() -> String {
    NEXT_BRANCH.to_string()
}

impl ControlFlowEdge {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source_step: source.into(),
            source_branch: default_branch(),
            destination_step: destination.into(),
        }
    }

    pub fn branch(
        source: impl Into<String>,
        branch: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            source_step: source.into(),
            source_branch: branch.into(),
            destination_step: destination.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_flow_definition_from_json() {
        let definition = json!({
            "component_type": "Flow",
            "id": "greeter",
            "name": "Greeter",
            "start_step": "start",
            "steps": [
                { "name": "start", "step_type": "start",
                  "inputs": [{ "name": "user_name", "type": "string" }] },
                { "name": "greet", "step_type": "output_message",
                  "message": "Hello {{user_name}}" },
                { "name": "end", "step_type": "complete" }
            ],
            "control_flow_edges": [
                { "source_step": "start", "destination_step": "greet" },
                { "source_step": "greet", "destination_step": "end" }
            ]
        });

        let assistant: Assistant = serde_json::from_value(definition).unwrap();
        let Assistant::Flow(flow) = assistant else { panic!("expected a flow") };
        assert_eq!(flow.steps.len(), 3);
        assert_eq!(flow.control_flow_edges[0].source_branch, NEXT_BRANCH);
        assert!(matches!(flow.steps[1].kind, StepKind::OutputMessage { .. }));
    }

    #[test]
    fn parse_agent_with_tools() {
        let definition = json!({
            "component_type": "Agent",
            "id": "helper",
            "name": "Helper",
            "llm": { "type": "scripted", "responses": [{ "text": "hi" }] },
            "tools": [
                { "name": "lookup", "tool_type": "client" },
                { "name": "double", "tool_type": "server", "script": "return args.x * 2",
                  "parameters": [{ "name": "x", "type": "integer" }] }
            ]
        });

        let assistant: Assistant = serde_json::from_value(definition).unwrap();
        let Assistant::Agent(agent) = assistant else { panic!("expected an agent") };
        assert_eq!(agent.max_iterations, 10);
        assert_eq!(agent.caller_input_mode, CallerInputMode::Always);
        assert!(agent.tools[0].is_client());
        assert!(!agent.tools[1].is_client());
    }

    #[test]
    fn value_type_matching() {
        assert!(ValueType::Integer.matches(&json!(3)));
        assert!(!ValueType::Integer.matches(&json!(3.5)));
        assert!(ValueType::Number.matches(&json!(3.5)));
        assert!(ValueType::Any.matches(&json!(null)));
        assert_eq!(ValueType::describe(&json!([1])), "array");
        assert_eq!(ValueType::Boolean.to_string(), "boolean");
    }

    #[test]
    fn step_mappings_default_to_identity() {
        let mut step = Step::new("render", StepKind::TemplateRendering { template: "x".into() });
        step.output_mapping.insert("output".into(), "summary".into());
        assert_eq!(step.output_key("output"), "summary");
        assert_eq!(step.input_key("text"), "text");
    }
}
