/// Input/output descriptors of assistants and steps
///
/// Derives which named values a component reads and writes, and validates
/// caller-supplied inputs against them.

use crate::assistant::types::{Agent, Assistant, Flow, Property, Step, StepKind, ValueType};
use crate::error::{Result, WayflowError};
use crate::tools::{check_type, template::template_inputs};
use serde_json::Value;
use std::collections::HashMap;

pub const USER_PROVIDED_INPUT: &str = "user_provided_input";
pub const OUTPUT_MESSAGE: &str = "output_message";
pub const TOOL_OUTPUT: &str = "tool_output";
pub const GENERATED_OUTPUT: &str = "output";
pub const NEXT_STEP_NAME: &str = "next_step_name";
pub const JSON_TEXT: &str = "text";
pub const ITERATED_INPUT: &str = "iterated_input";
pub const MAP_ITEM: &str = "item";
pub const HTTP_STATUS_CODE: &str = "http_status_code";
pub const HTTP_RESPONSE: &str = "response";

pub fn assistant_inputs(assistant: &Assistant) -> Vec<Property> {
    match assistant {
        Assistant::Agent(agent) => agent_inputs(agent),
        Assistant::Flow(flow) => flow_inputs(flow),
    }
}

pub fn agent_inputs(agent: &Agent) -> Vec<Property> {
    if agent.inputs.is_empty() {
        template_inputs(&agent.system_prompt)
    } else {
        agent.inputs.clone()
    }
}

pub fn flow_inputs(flow: &Flow) -> Vec<Property> {
    flow.step(&flow.start_step)
        .and_then(|step| match &step.kind {
            StepKind::Start { inputs } => Some(inputs.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Named values a step reads (before `input_mapping` is applied)
pub fn step_inputs(step: &Step) -> Vec<Property> {
    match &step.kind {
        StepKind::Start { .. } | StepKind::Complete => Vec::new(),
        StepKind::OutputMessage { message } => template_inputs(message),
        StepKind::InputMessage { message } => {
            message.as_deref().map(template_inputs).unwrap_or_default()
        }
        StepKind::ToolExecution { tool } => tool.parameters.clone(),
        StepKind::PromptExecution { prompt, .. } => template_inputs(prompt),
        StepKind::AgentExecution { agent } => agent_inputs(agent),
        StepKind::FlowExecution { flow } => flow_inputs(flow),
        StepKind::Branching { .. } => vec![Property::new(NEXT_STEP_NAME, ValueType::Any)],
        StepKind::TemplateRendering { template } => template_inputs(template),
        StepKind::ExtractValueFromJson { .. } => vec![Property::new(JSON_TEXT, ValueType::Any)],
        StepKind::Map { .. } => vec![Property::new(ITERATED_INPUT, ValueType::Array)],
        StepKind::ApiCall { url, headers, body, .. } => {
            let mut inputs = template_inputs(url);
            let mut header_names: Vec<&String> = headers.keys().collect();
            header_names.sort();
            let extra = header_names
                .into_iter()
                .flat_map(|name| template_inputs(&headers[name]))
                .chain(body.as_deref().map(template_inputs).unwrap_or_default());
            for property in extra {
                if !inputs.iter().any(|p| p.name == property.name) {
                    inputs.push(property);
                }
            }
            inputs
        }
    }
}

/// Validate caller inputs: reject unknown names, apply defaults, check types
pub fn validate_inputs(
    component: &str,
    descriptors: &[Property],
    provided: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut names: Vec<&String> = provided.keys().collect();
    names.sort();
    if let Some(unknown) = names
        .into_iter()
        .find(|name| !descriptors.iter().any(|d| &d.name == *name))
    {
        return Err(WayflowError::UnknownInput {
            component: component.to_string(),
            name: unknown.clone(),
        });
    }

    let mut values = HashMap::new();
    for descriptor in descriptors {
        let value = match provided.get(&descriptor.name) {
            Some(value) => value.clone(),
            None => descriptor
                .default
                .clone()
                .ok_or_else(|| WayflowError::MissingInput {
                    component: component.to_string(),
                    name: descriptor.name.clone(),
                })?,
        };
        check_type(component, descriptor, &value)?;
        values.insert(descriptor.name.clone(), value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::types::Tool;
    use serde_json::json;

    #[test]
    fn unknown_input_name_is_rejected() {
        let descriptors = vec![Property::string("city")];
        let provided = HashMap::from([("country".to_string(), json!("FR"))]);
        let err = validate_inputs("weather", &descriptors, &provided).unwrap_err();
        assert!(matches!(err, WayflowError::UnknownInput { name, .. } if name == "country"));
    }

    #[test]
    fn defaults_fill_missing_optional_inputs() {
        let descriptors = vec![
            Property::string("city"),
            Property::new("days", ValueType::Integer).with_default(json!(3)),
        ];
        let provided = HashMap::from([("city".to_string(), json!("Lyon"))]);
        let values = validate_inputs("weather", &descriptors, &provided).unwrap();
        assert_eq!(values["days"], json!(3));

        let err = validate_inputs("weather", &descriptors, &HashMap::new()).unwrap_err();
        assert!(matches!(err, WayflowError::MissingInput { name, .. } if name == "city"));
    }

    #[test]
    fn step_inputs_follow_step_kind() {
        let step = Step::new(
            "call",
            StepKind::ApiCall {
                url: "https://example.com/{{path}}".into(),
                method: "POST".into(),
                headers: HashMap::from([("x-token".to_string(), "{{token}}".to_string())]),
                body: Some("{\"q\": \"{{path}}\"}".into()),
            },
        );
        let names: Vec<String> = step_inputs(&step).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["path", "token"]);

        let tool_step = Step::new(
            "tool",
            StepKind::ToolExecution {
                tool: Tool {
                    name: "lookup".into(),
                    description: String::new(),
                    parameters: vec![Property::string("query")],
                    kind: crate::assistant::types::ToolKind::Client,
                },
            },
        );
        assert_eq!(step_inputs(&tool_step)[0].name, "query");
    }
}
