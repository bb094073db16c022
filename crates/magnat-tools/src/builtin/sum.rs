use futures::future::BoxFuture;
use serde_json::{json, Value};

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::Tool;
use magnat_core::types::ToolResult;

/// Adds two numbers. Integer inputs give an integer result.
pub struct SumTool;

impl Tool for SumTool {
    fn name(&self) -> &str {
        "sum"
    }

    fn description(&self) -> &str {
        "Add two numbers and return their sum. Use it for score and resource arithmetic."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First addend" },
                "b": { "type": "number", "description": "Second addend" }
            },
            "required": ["a", "b"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        5
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let (a, b) = (operand(&input, "a")?, operand(&input, "b")?);

            let total = match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => match x.checked_add(y) {
                    Some(n) => json!(n),
                    None => json!(x as f64 + y as f64),
                },
                _ => json!(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default()),
            };
            Ok(ToolResult::json(&total))
        })
    }
}

fn operand<'a>(input: &'a Value, key: &str) -> Result<&'a Value> {
    match input.get(key) {
        Some(v) if v.is_number() => Ok(v),
        Some(other) => Err(MagnatError::ToolValidation(format!(
            "sum: '{}' must be a number, got {}",
            key, other
        ))),
        None => Err(MagnatError::ToolValidation(format!(
            "sum: missing '{}'",
            key
        ))),
    }
}
