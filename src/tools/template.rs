/// Sandboxed prompt/message templates
///
/// Templates are Handlebars, rendered in strict mode without HTML escaping.
/// Constructs that reach outside the supplied values (partials, decorators,
/// raw blocks, `@root`, dunder paths) are rejected before rendering.

use crate::assistant::types::Property;
use crate::error::{Result, WayflowError};
use handlebars::Handlebars;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

fn mustache_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\{?)([^{}]*)\}?\}\}").expect("valid mustache regex"))
}

/// Reject template constructs that could escape the value sandbox
pub fn check_template_safety(template: &str) -> Result<()> {
    if template.contains("{{{{") {
        return Err(WayflowError::UnsafeTemplate("raw blocks are not allowed".into()));
    }

    for caps in mustache_regex().captures_iter(template) {
        let expr = caps[2].trim();
        if expr.starts_with('>') || expr.starts_with("#>") {
            return Err(WayflowError::UnsafeTemplate(format!("partial '{{{{{}}}}}'", expr)));
        }
        if expr.starts_with('*') || expr.starts_with("#*") {
            return Err(WayflowError::UnsafeTemplate(format!("decorator '{{{{{}}}}}'", expr)));
        }
        if expr.contains("@root") {
            return Err(WayflowError::UnsafeTemplate("@root access is not allowed".into()));
        }
        if expr.contains("__") {
            return Err(WayflowError::UnsafeTemplate(format!(
                "dunder access in '{{{{{}}}}}'",
                expr
            )));
        }
    }

    Ok(())
}

/// Top-level value names a template reads, in order of first use.
///
/// Names used inside `#each`/`#with` blocks belong to the block context and
/// are not reported.
pub fn template_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut scoped_depth = 0usize;

    for caps in mustache_regex().captures_iter(template) {
        let expr = caps[2].trim();
        if expr.is_empty() || expr.starts_with('!') {
            continue;
        }

        let candidate = if let Some(block) = expr.strip_prefix('#') {
            let mut parts = block.split_whitespace();
            let helper = parts.next().unwrap_or_default();
            let argument = parts.next();
            let outer = scoped_depth == 0;
            if helper == "each" || helper == "with" {
                scoped_depth += 1;
            }
            if outer {
                argument
            } else {
                None
            }
        } else if let Some(closing) = expr.strip_prefix('/') {
            if matches!(closing.trim(), "each" | "with") {
                scoped_depth = scoped_depth.saturating_sub(1);
            }
            None
        } else if expr == "else" || expr.starts_with("else ") || scoped_depth > 0 {
            None
        } else {
            expr.split_whitespace().next()
        };

        if let Some(token) = candidate {
            if token.starts_with('@') || token.starts_with('.') || token == "this" {
                continue;
            }
            let root = token
                .split(|c| c == '.' || c == '[' || c == '/')
                .next()
                .unwrap_or_default();
            if !root.is_empty() && !names.iter().any(|n| n == root) {
                names.push(root.to_string());
            }
        }
    }

    names
}

/// Input descriptors derived from a template (all strings, all required)
pub fn template_inputs(template: &str) -> Vec<Property> {
    template_variables(template)
        .into_iter()
        .map(Property::string)
        .collect()
}

/// Render a template against named values
pub fn render_template(template: &str, values: &HashMap<String, Value>) -> Result<String> {
    check_template_safety(template)?;

    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .render_template(template, values)
        .map_err(|e| WayflowError::Template(e.to_string()))
}
