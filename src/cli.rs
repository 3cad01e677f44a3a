/// Command-line interface
///
/// `serve` runs the HTTP server, `validate` checks assistant files and `chat`
/// drives a conversation on the terminal.

use crate::{
    assistant::loader,
    config::Config,
    conversation::{Conversation, ExecutionStatus, MessageType, ToolResult},
    llm::ModelRegistry,
    runtime::{validate_assistant, ExecutionEngine},
    server::{init_tracing, start_server},
};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

#[derive(Debug, Parser)]
#[command(
    name = "wayflow",
    version,
    about = "Conversation runtime for agents and flows"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Validate assistant files (JSON or YAML)
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Chat with an assistant on the terminal
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub data_dir: Option<String>,

    /// Directory of assistant files registered at start-up
    #[arg(long)]
    pub assistants: Option<String>,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    pub file: PathBuf,

    /// Conversation input as `name=value`; values parse as JSON when they can
    #[arg(long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, Value)>,
}

/// Parse a `name=value` pair
pub fn parse_input(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("empty input name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let mut config = Config::default();
            if let Some(host) = args.host {
                config.server.host = host;
            }
            if let Some(port) = args.port {
                config.server.port = port;
            }
            if let Some(data_dir) = args.data_dir {
                config.database.data_dir = data_dir;
            }
            if args.assistants.is_some() {
                config.runtime.assistants_dir = args.assistants;
            }
            start_server(config).await
        }
        Command::Validate { files } => validate(&files),
        Command::Chat(args) => {
            init_tracing();
            chat(args).await
        }
    }
}

fn validate(files: &[PathBuf]) -> Result<()> {
    let mut failures = 0;
    for file in files {
        let outcome = loader::load_file(file).and_then(|assistant| {
            validate_assistant(&assistant)?;
            Ok(assistant)
        });
        match outcome {
            Ok(assistant) => println!("✅ {}: {} '{}'", file.display(), assistant.kind(), assistant.id()),
            Err(e) => {
                failures += 1;
                println!("❌ {}: {:#}", file.display(), e);
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} files failed validation", failures, files.len()));
    }
    Ok(())
}

async fn chat(args: ChatArgs) -> Result<()> {
    let assistant = loader::load_file(&args.file)?;
    let engine = ExecutionEngine::new(Arc::new(ModelRegistry::new()));
    let inputs: HashMap<String, Value> = args.inputs.into_iter().collect();
    let mut conversation = engine.start_conversation(&assistant, inputs)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let seen = conversation.messages.len();
        let status = engine.execute(&mut conversation).await?;
        print_new_messages(&conversation, seen);

        match status {
            ExecutionStatus::Finished { output_values, .. } => {
                println!("{}", serde_json::to_string_pretty(&output_values)?);
                return Ok(());
            }
            ExecutionStatus::UserMessageRequest { .. } => {
                let Some(line) = prompt(&mut lines, "you> ").await? else {
                    return Ok(());
                };
                conversation.append_user_message(line)?;
            }
            ExecutionStatus::ToolRequest { tool_requests } => {
                for request in tool_requests {
                    let label = format!("{}({}) result> ", request.name, request.args);
                    let Some(line) = prompt(&mut lines, &label).await? else {
                        return Ok(());
                    };
                    let content =
                        serde_json::from_str(&line).unwrap_or_else(|_| Value::String(line.clone()));
                    conversation.append_tool_result(ToolResult::new(request.tool_request_id, content))?;
                }
            }
        }
    }
}

fn print_new_messages(conversation: &Conversation, seen: usize) {
    for message in conversation.messages.iter().skip(seen) {
        match message.message_type {
            MessageType::Agent | MessageType::System if !message.content.is_empty() => {
                println!("assistant> {}", message.content)
            }
            _ => {}
        }
    }
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    lines.next_line().await.context("Failed to read stdin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_values_parse_as_json_or_fall_back_to_text() {
        assert_eq!(parse_input("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(
            parse_input("name=Ada Lovelace").unwrap(),
            ("name".to_string(), json!("Ada Lovelace"))
        );
        assert_eq!(parse_input("tags=[\"a\"]").unwrap().1, json!(["a"]));
        assert!(parse_input("novalue").is_err());
        assert!(parse_input("=x").is_err());
    }

    #[test]
    fn chat_collects_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "wayflow", "chat", "agent.yaml", "--input", "a=1", "--input", "b=two",
        ])
        .unwrap();
        match cli.command {
            Command::Chat(args) => {
                assert_eq!(args.file, PathBuf::from("agent.yaml"));
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.inputs[1], ("b".to_string(), json!("two")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn validate_requires_a_file() {
        assert!(Cli::try_parse_from(["wayflow", "validate"]).is_err());
    }
}
