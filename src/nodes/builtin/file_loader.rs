/// File loader node
///
/// Reads a UTF-8 file from `path`, or takes inline `content`, and publishes it
/// as context for downstream nodes.

use crate::nodes::{config_str, FieldKind, FieldSpec, NodeContext, NodeHandler, NodeMetadata, NodeOutput, NodeSchema, OutputRole};
use crate::error::FieldError;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct FileLoader;

impl FileLoader {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("file_loader", "File Loader", "input")
            .describe("Load a text document from disk or inline content")
            .output(OutputRole::Context, "text")
            .schema(FileLoader.schema())
    }
}

#[async_trait]
impl NodeHandler for FileLoader {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::optional("path", FieldKind::String))
            .config(FieldSpec::optional("content", FieldKind::String).describe("Inline content used instead of a file"))
            .output(FieldSpec::required("text", FieldKind::String))
            .output(FieldSpec::optional("path", FieldKind::String))
    }

    fn validate(&self, config: &Map<String, Value>) -> Result<(), Vec<FieldError>> {
        self.schema().validate_config(config)?;
        if config_str(config, "path").is_none() && config_str(config, "content").is_none() {
            return Err(vec![FieldError::new("path", "either 'path' or 'content' is required")]);
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext, _inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        if let Some(content) = config_str(&config, "content") {
            return Ok(NodeOutput::text(content).with_field("size", content.len() as u64));
        }

        let path = config_str(&config, "path").context("file_loader requires 'path' or 'content'")?;
        ctx.progress.report(0.0, format!("reading {path}"));
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read '{path}'"))?;
        ctx.progress.report(1.0, format!("read {} bytes", content.len()));
        tracing::debug!(node_id = %ctx.node_id, path, bytes = content.len(), "loaded file");

        Ok(NodeOutput::text(content.clone())
            .with_field("content", content.clone())
            .with_field("path", path)
            .with_field("size", content.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "document body").unwrap();
        let config = json!({"path": file.path().to_str().unwrap()});
        let out = FileLoader
            .execute(&NodeContext::detached("f"), Map::new(), config.as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(out.data["text"], "document body");
        assert_eq!(out.data["size"], 13);
    }

    #[tokio::test]
    async fn test_missing_file_keeps_path_in_error() {
        let config = json!({"path": "/definitely/not/here.txt"});
        let err = FileLoader
            .execute(&NodeContext::detached("f"), Map::new(), config.as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.txt"));
    }

    #[test]
    fn test_requires_path_or_content() {
        assert!(FileLoader.validate(&Map::new()).is_err());
        assert!(FileLoader.validate(json!({"content": "x"}).as_object().unwrap()).is_ok());
    }
}
