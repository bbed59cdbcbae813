//! Tool calls issued by the agent and the results the client returns.

use serde::{Deserialize, Serialize};

/// `err` text of a command the user declined to run.
pub const DECLINED_MESSAGE: &str = "Command execution was declined by the user.";

/// `err` text of an elevated command attempted without a cached credential.
pub const NO_CREDENTIAL_MESSAGE: &str = "sudo: no password provided";

/// Upstream risk classification of a command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditCategory {
    Safe,
    Warning,
    Danger,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReport {
    pub category: AuditCategory,
    #[serde(default)]
    pub reason: String,
}

/// A single unit of work inside an inbound `tool` batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ToolCall {
    #[serde(rename = "cmd")]
    Command(CommandCall),
    #[serde(rename = "sudo")]
    Elevation(ElevationCall),
}

impl ToolCall {
    pub fn id(&self) -> &str {
        match self {
            ToolCall::Command(call) => &call.id,
            ToolCall::Elevation(call) => &call.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandCall {
    pub id: String,
    pub cmd: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<AuditReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElevationCall {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// Outcome of one [`ToolCall`], positionally matched in the reply batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ToolResult {
    #[serde(rename = "cmd")]
    Command(CommandResult),
    #[serde(rename = "sudo")]
    Elevation(ElevationResult),
}

impl ToolResult {
    pub fn id(&self) -> &str {
        match self {
            ToolResult::Command(result) => &result.id,
            ToolResult::Elevation(result) => &result.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub id: String,
    pub result: bool,
    pub out: String,
    pub err: String,
    pub exit_code: i32,
}

impl CommandResult {
    /// Result reported when the user declines a command.
    pub fn declined(id: impl Into<String>) -> Self {
        Self::failed(id, DECLINED_MESSAGE)
    }

    /// Result for a command that never produced process output.
    pub fn failed(id: impl Into<String>, err: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: false,
            out: String::new(),
            err: err.into(),
            exit_code: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElevationResult {
    pub id: String,
    pub sudo: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_call_with_report() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "t1",
            "type": "cmd",
            "cmd": "ls -la",
            "desc": "List files",
            "report": {"category": "Warning", "reason": "touches home"}
        }))
        .unwrap();

        match call {
            ToolCall::Command(cmd) => {
                assert_eq!(cmd.cmd, "ls -la");
                let report = cmd.report.unwrap();
                assert_eq!(report.category, AuditCategory::Warning);
                assert_eq!(report.reason, "touches home");
            }
            other => panic!("Expected command call, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_category_is_unknown() {
        let report: AuditReport =
            serde_json::from_value(json!({"category": "Catastrophic", "reason": "?"})).unwrap();
        assert_eq!(report.category, AuditCategory::Unknown);
    }

    #[test]
    fn test_elevation_call() {
        let call: ToolCall =
            serde_json::from_value(json!({"id": "s1", "type": "sudo", "message": "need root"}))
                .unwrap();
        assert_eq!(call.id(), "s1");
        assert!(matches!(call, ToolCall::Elevation(ref e) if e.message == "need root"));
    }

    #[test]
    fn test_result_wire_shape() {
        let value = serde_json::to_value(ToolResult::Command(CommandResult {
            id: "t1".into(),
            result: true,
            out: "ok\n".into(),
            err: String::new(),
            exit_code: 0,
        }))
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "cmd", "id": "t1", "result": true, "out": "ok\n", "err": "", "exit_code": 0})
        );

        let value = serde_json::to_value(ToolResult::Elevation(ElevationResult {
            id: "s1".into(),
            sudo: false,
        }))
        .unwrap();
        assert_eq!(value, json!({"type": "sudo", "id": "s1", "sudo": false}));
    }

    #[test]
    fn test_declined_result() {
        let result = CommandResult::declined("t9");
        assert_eq!(result.id, "t9");
        assert!(!result.result);
        assert_eq!(result.exit_code, 1);
        assert!(result.out.is_empty());
        assert_eq!(result.err, DECLINED_MESSAGE);
    }
}
