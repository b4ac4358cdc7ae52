//! echo capability - return the `text` argument unchanged

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::definition::{Capability, CapabilityError};

pub struct Echo;

#[async_trait]
impl Capability for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text. Useful for recording a final answer."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"]
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, CapabilityError> {
        args.get("text")
            .cloned()
            .ok_or_else(|| CapabilityError::invalid("'text' is required"))
    }
}
