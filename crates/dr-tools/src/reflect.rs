//! Reflection tool: records a strategic note in the transcript.

use async_trait::async_trait;
use serde::Deserialize;

use dr_core::{Error, PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters, REFLECT_TOOL};

pub const REFLECTION_ACK: &str = "Reflection recorded. Continue with your research plan.";

#[derive(Debug, Default)]
pub struct ReflectTool;

impl ReflectTool {
    pub fn new() -> Self {
        Self
    }

    /// Acknowledge a note, echoing it verbatim so it stays in the transcript.
    pub fn reflect(&self, note: &str) -> String {
        if note.is_empty() {
            REFLECTION_ACK.to_string()
        } else {
            format!("{}\n\n{}", REFLECTION_ACK, note)
        }
    }
}

#[derive(Deserialize)]
struct ReflectArgs {
    #[serde(default)]
    reflection: String,
}

#[async_trait]
impl Tool for ReflectTool {
    fn name(&self) -> &str {
        REFLECT_TOOL
    }

    fn description(&self) -> &str {
        "Pause and reflect on research progress: what has been found, what gaps remain, \
         and whether to keep searching or submit an answer."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property(
                "reflection",
                PropertySchema::string("Your reflection on progress and next steps"),
                true,
            ),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, Error> {
        let args: ReflectArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool(REFLECT_TOOL, format!("Invalid arguments: {}", e)))?;

        Ok(ToolOutput::success(self.reflect(&args.reflection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_note_is_echoed_verbatim() {
        let note = "Covered the core API; still missing benchmarks.\n  - check https://example.com";
        let output = ReflectTool::new()
            .execute(json!({"reflection": note}))
            .await
            .unwrap();
        assert!(!output.is_error);
        assert!(output.content.starts_with(REFLECTION_ACK));
        assert!(output.content.ends_with(note));
    }

    #[tokio::test]
    async fn test_empty_note_is_accepted() {
        let tool = ReflectTool::new();
        assert_eq!(tool.execute(json!({"reflection": ""})).await.unwrap().content, REFLECTION_ACK);
        assert_eq!(tool.execute(json!({})).await.unwrap().content, REFLECTION_ACK);
    }

    #[tokio::test]
    async fn test_rejects_non_string_note() {
        assert!(ReflectTool::new().execute(json!({"reflection": 42})).await.is_err());
    }
}
