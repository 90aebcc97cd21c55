//! `ocr_extract` — built-in OCR tool for document/photo uploads (§4.3, §6.5).
//!
//! Shells out to the configured `ocr_engine` (default `tesseract`, see
//! `StorageConfig::ocr_engine`) the same way `execute_command` shells out to
//! `sh -c`, but scoped to a single sandboxed image path rather than an
//! arbitrary command line.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use nexus_core::storage::FileSandbox;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

const OCR_TIMEOUT_SECS: u64 = 30;

pub struct OcrExtractTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    sandbox: FileSandbox,
}

impl<C: MessageContext + 'static> OcrExtractTool<C> {
    pub fn new(ctx: Arc<C>, sandbox: FileSandbox) -> Self {
        Self { ctx, sandbox }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for OcrExtractTool<C> {
    fn name(&self) -> &str {
        "ocr_extract"
    }

    fn description(&self) -> &str {
        "Extract text from an image or scanned document already present in this \
         workspace's files. Pass the same relative path read_file/list_files would use."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Relative path to the image, under this workspace's files root." }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let requested = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("missing required parameter: path"),
        };

        let resolved = match self.sandbox.resolve(requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("ocr_extract path rejected: {e}")),
        };

        if !resolved.exists() {
            return ToolResult::error(format!("file not found: {requested}"));
        }

        let engine = self.ctx.storage_config().ocr_engine.clone();

        let run = Command::new(&engine)
            .arg(&resolved)
            .arg("-")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output();

        match tokio::time::timeout(Duration::from_secs(OCR_TIMEOUT_SECS), run).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if output.status.success() {
                    if stdout.is_empty() {
                        ToolResult::success("(no text detected)")
                    } else {
                        ToolResult::success(stdout)
                    }
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    ToolResult::error(format!(
                        "{engine} exited with {}: {stderr}",
                        output.status
                    ))
                }
            }
            Ok(Err(e)) => ToolResult::error(format!("failed to run {engine}: {e}")),
            Err(_) => ToolResult::error(format!("{engine} timed out after {OCR_TIMEOUT_SECS}s")),
        }
    }
}
