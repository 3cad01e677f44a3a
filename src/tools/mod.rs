/// Tool dispatch and templating
///
/// - Server tools run in a sandboxed Lua interpreter
/// - Client tools are handed back to the caller as tool requests
/// - Templates render messages and prompts with a restricted Handlebars

pub mod lua;
pub mod template;

use crate::assistant::types::{Property, Tool, ToolKind, ValueType};
use crate::error::{Result, WayflowError};
use serde_json::Value;

/// Name of the built-in tool agents call to finish with outputs
pub const SUBMIT_RESULT_TOOL: &str = "submit_result";

/// Look a tool up by name in a toolbox
pub fn resolve_tool<'a>(tools: &'a [Tool], name: &str) -> Result<&'a Tool> {
    tools
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| WayflowError::ToolNotFound(name.to_string()))
}

/// Validate tool arguments against the declared parameters and fill defaults
pub fn prepare_arguments(tool: &Tool, args: &Value) -> Result<Value> {
    let empty = serde_json::Map::new();
    let provided = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(WayflowError::InputTypeMismatch {
                component: tool.name.clone(),
                name: "arguments".to_string(),
                expected: "object".to_string(),
                found: ValueType::describe(other).to_string(),
            })
        }
    };

    if let Some(unknown) = provided
        .keys()
        .find(|k| !tool.parameters.iter().any(|p| &p.name == *k))
    {
        return Err(WayflowError::UnknownInput {
            component: tool.name.clone(),
            name: unknown.clone(),
        });
    }

    let mut prepared = serde_json::Map::new();
    for parameter in &tool.parameters {
        let value = match provided.get(&parameter.name) {
            Some(value) => value.clone(),
            None => parameter.default.clone().ok_or_else(|| WayflowError::MissingInput {
                component: tool.name.clone(),
                name: parameter.name.clone(),
            })?,
        };
        check_type(&tool.name, parameter, &value)?;
        prepared.insert(parameter.name.clone(), value);
    }

    Ok(Value::Object(prepared))
}

pub(crate) fn check_type(component: &str, property: &Property, value: &Value) -> Result<()> {
    if property.value_type.matches(value) {
        Ok(())
    } else {
        Err(WayflowError::InputTypeMismatch {
            component: component.to_string(),
            name: property.name.clone(),
            expected: property.value_type.to_string(),
            found: ValueType::describe(value).to_string(),
        })
    }
}

/// Run a server tool with already prepared arguments.
///
/// The script runs on the blocking pool so a slow tool never stalls the
/// async workers.
pub async fn execute_server_tool(tool: &Tool, args: &Value) -> Result<Value> {
    let ToolKind::Server { script } = &tool.kind else {
        return Err(WayflowError::ToolExecution {
            tool: tool.name.clone(),
            message: "client tools are executed by the caller".to_string(),
        });
    };

    let start_time = std::time::Instant::now();
    let output = tokio::task::spawn_blocking({
        let script = script.clone();
        let args = args.clone();
        move || lua::run_script(&script, &args)
    })
    .await
    .map_err(|e| WayflowError::ToolExecution {
        tool: tool.name.clone(),
        message: format!("script task failed: {}", e),
    })?
    .map_err(|message| WayflowError::ToolExecution {
        tool: tool.name.clone(),
        message,
    })?;
    tracing::info!("🔧 Server tool '{}' completed in {:?}", tool.name, start_time.elapsed());

    Ok(output)
}

/// Synthetic client-facing spec of the `submit_result` tool
pub fn submit_result_tool(outputs: &[Property]) -> Tool {
    Tool {
        name: SUBMIT_RESULT_TOOL.to_string(),
        description: "Submit the final outputs and finish the conversation".to_string(),
        parameters: outputs.to_vec(),
        kind: ToolKind::Client,
    }
}
