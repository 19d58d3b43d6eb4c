use crate::error::{ActionError, Result};
use serde_json::Value;

/// Renders an action config's `template_detail` against the alert
/// context. Every string leaf is a template; structure and non-string
/// leaves pass through unchanged. A render failure is fatal for the
/// instance.
pub fn render_inputs(template_detail: &str, context: &Value) -> Result<Value> {
    let templates: Value = serde_json::from_str(template_detail)
        .map_err(|e| ActionError::Render(format!("template_detail is not JSON: {e}")))?;
    let env = minijinja::Environment::new();
    render_value(&env, &templates, context)
}

fn render_value(
    env: &minijinja::Environment<'_>,
    value: &Value,
    context: &Value,
) -> Result<Value> {
    match value {
        Value::String(s) => {
            let rendered = env
                .render_str(s, context)
                .map_err(|e| ActionError::Render(e.to_string()))?;
            Ok(Value::String(rendered))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_value(env, item, context)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(env, v, context)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
