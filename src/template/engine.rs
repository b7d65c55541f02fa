use std::collections::HashMap;
use std::sync::OnceLock;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::NodeError;

/// Prompt and answer templates, rendered with minijinja.
///
/// Undefined variables render as empty strings, the way users of the
/// canvas expect a missing optional input to behave.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        env.set_keep_trailing_newline(true);
        env.add_filter("default", default_filter);
        env.add_filter("json", json_filter);
        TemplateEngine { env }
    }

    /// Engine shared by every node of the process.
    pub fn shared() -> &'static TemplateEngine {
        static ENGINE: OnceLock<TemplateEngine> = OnceLock::new();
        ENGINE.get_or_init(TemplateEngine::new)
    }

    /// Reject templates that do not parse, so bad prompts fail at compile time.
    pub fn check(&self, template: &str) -> Result<(), NodeError> {
        self.env
            .template_from_str(template)
            .map(|_| ())
            .map_err(|e| NodeError::TemplateError(format!("template compile error: {}", e)))
    }

    pub fn render(&self, template: &str, variables: &HashMap<String, Value>) -> Result<String, NodeError> {
        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| NodeError::TemplateError(format!("template compile error: {}", e)))?;
        tmpl.render(minijinja::Value::from_serialize(variables))
            .map_err(|e| NodeError::TemplateError(format!("template render error: {}", e)))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_filter(value: minijinja::Value, default: Option<minijinja::Value>) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or_else(|| minijinja::Value::from(""))
    } else {
        value
    }
}

fn json_filter(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
    })
}
