/// Lua script node using mlua
///
/// Expected config: { "script": "return { text = inputs.text .. '!' }" }
///
/// The script sees `inputs` and `config` as Lua tables built through serde.
/// A table return becomes the output mapping; any other value is published
/// under `output`. A fresh interpreter runs on a blocking thread per call, so
/// the interpreter never crosses an await point.

use crate::nodes::{config_str, FieldKind, FieldSpec, NodeContext, NodeHandler, NodeMetadata, NodeOutput, NodeSchema, OutputRole};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mlua::{Lua, LuaSerdeExt};
use serde_json::{Map, Value};

pub struct Script;

impl Script {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("script", "Lua Script", "logic")
            .describe("Transform inputs with an embedded Lua script")
            .output(OutputRole::Generic, "output")
            .schema(Script.schema())
    }
}

#[async_trait]
impl NodeHandler for Script {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new().config(FieldSpec::required("script", FieldKind::String))
    }

    async fn execute(&self, ctx: &NodeContext, inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        let script = config_str(&config, "script")
            .ok_or_else(|| anyhow!("script node missing 'script' config"))?
            .to_string();
        tracing::debug!(node_id = %ctx.node_id, bytes = script.len(), "running lua script");

        let result = tokio::task::spawn_blocking(move || run_lua(&script, inputs, config))
            .await
            .map_err(|e| anyhow!("lua task failed: {e}"))??;

        let data = match result {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                if let Value::String(s) = &other {
                    map.insert("text".into(), Value::String(s.clone()));
                }
                map.insert("output".into(), other);
                map
            }
        };
        Ok(NodeOutput::new(data))
    }
}

fn run_lua(script: &str, inputs: Map<String, Value>, config: Map<String, Value>) -> Result<Value> {
    let lua = Lua::new();
    let globals = lua.globals();

    // Sandbox: no filesystem, process or module access
    for name in ["os", "io", "debug", "package", "require", "dofile", "loadfile"] {
        globals
            .set(name, mlua::Nil)
            .map_err(|e| anyhow!("failed to sandbox lua: {e}"))?;
    }

    let inputs = lua
        .to_value(&Value::Object(inputs))
        .map_err(|e| anyhow!("failed to expose inputs to lua: {e}"))?;
    let config = lua
        .to_value(&Value::Object(config))
        .map_err(|e| anyhow!("failed to expose config to lua: {e}"))?;
    globals.set("inputs", inputs).map_err(|e| anyhow!("failed to set inputs: {e}"))?;
    globals.set("config", config).map_err(|e| anyhow!("failed to set config: {e}"))?;

    let value: mlua::Value = lua
        .load(script)
        .eval()
        .map_err(|e| anyhow!("lua script execution failed: {e}"))?;
    lua.from_value(value).map_err(|e| anyhow!("lua result is not JSON-compatible: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_table_result_becomes_output() {
        let config = map(json!({"script": "return { text = string.upper(inputs.text), n = config.factor * 2 }", "factor": 21}));
        let out = Script
            .execute(&NodeContext::detached("s"), map(json!({"text": "hi"})), config)
            .await
            .unwrap();
        assert_eq!(out.data["text"], "HI");
        assert_eq!(out.data["n"], 42);
    }

    #[tokio::test]
    async fn test_scalar_result_wrapped() {
        let config = map(json!({"script": "return 'done'"}));
        let out = Script.execute(&NodeContext::detached("s"), Map::new(), config).await.unwrap();
        assert_eq!(out.data["output"], "done");
        assert_eq!(out.data["text"], "done");
    }

    #[tokio::test]
    async fn test_sandbox_blocks_os() {
        let config = map(json!({"script": "return os.getenv('HOME')"}));
        let err = Script.execute(&NodeContext::detached("s"), Map::new(), config).await.unwrap_err();
        assert!(err.to_string().contains("lua script execution failed"));
    }
}
