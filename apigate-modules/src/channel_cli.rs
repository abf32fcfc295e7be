use crate::runtime::ModuleRuntime;
use apigate_core::error::GatewayError;
use serde_json::{json, Map, Value};

/// Parsed `apigate <module-plural> <action> [--field=value…]` invocation
/// (§6 CLI surface, §4.11). Flag parsing is deliberately simple: the CLI
/// channel mirrors the HTTP channel's actions, it doesn't reinvent them.
pub fn parse_field_args(args: &[String]) -> Map<String, Value> {
    let mut fields = Map::new();
    for arg in args {
        let Some(rest) = arg.strip_prefix("--") else { continue };
        match rest.split_once('=') {
            Some((key, value)) => {
                fields.insert(key.to_string(), coerce_scalar(value));
            }
            None => {
                fields.insert(rest.to_string(), Value::Bool(true));
            }
        }
    }
    fields
}

fn coerce_scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return json!(f);
    }
    if raw == "true" || raw == "false" {
        return json!(raw == "true");
    }
    json!(raw)
}

/// Runs one CLI invocation against the module runtime, mirroring the HTTP
/// channel's dispatch (§4.11): `module_plural` resolves via the module's
/// derived base path, same as the HTTP route prefix.
pub async fn run(
    runtime: &ModuleRuntime,
    module_plural: &str,
    action: &str,
    args: &[String],
) -> Result<Value, GatewayError> {
    let module = runtime
        .module_by_base_path(module_plural)
        .ok_or_else(|| GatewayError::not_found(format!("module '{module_plural}' not found")))?;
    let input = Value::Object(parse_field_args(args));
    let outcome = runtime.execute(&module.name, action, input).await?;
    Ok(json!({
        "data": outcome.data,
        "list": outcome.list,
        "count": outcome.count,
        "meta": outcome.meta,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_scalars_from_flags() {
        let fields = parse_field_args(&["--name=alice".to_string(), "--age=30".to_string(), "--active=true".to_string()]);
        assert_eq!(fields.get("name").unwrap(), "alice");
        assert_eq!(fields.get("age").unwrap(), 30);
        assert_eq!(fields.get("active").unwrap(), true);
    }

    #[test]
    fn flag_without_value_becomes_boolean_true() {
        let fields = parse_field_args(&["--verbose".to_string()]);
        assert_eq!(fields.get("verbose").unwrap(), &Value::Bool(true));
    }
}
