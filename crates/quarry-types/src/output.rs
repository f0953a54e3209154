use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Committed file reference returned to the LLM conversation.
///
/// `file_name` is accepted as an alias for `name` because older tool outputs
/// used it; decoding happens once here rather than at every call site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileResult {
    pub id: String,
    #[serde(alias = "file_name")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub version_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

/// Output of a batched create/modify file tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileBatchOutput {
    pub message: String,
    pub files: Vec<FileResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_files: Vec<FailedFile>,
}

/// Output of a single-document tool (report create/modify).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SingleFileOutput {
    pub success: bool,
    pub message: String,
    pub file: FileResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of a tool call that failed before producing any file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureOutput {
    pub message: String,
    pub error: String,
}

/// Every shape a tool's `execute` can return, decoded once at the
/// persistence boundary. Variant order matters for untagged deserialization:
/// the most field-rich shapes are tried first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolOutput {
    FileBatch(FileBatchOutput),
    SingleFile(SingleFileOutput),
    Failure(FailureOutput),
}

impl ToolOutput {
    /// All committed files regardless of shape, for association tracking.
    pub fn files(&self) -> Vec<&FileResult> {
        match self {
            ToolOutput::FileBatch(batch) => batch.files.iter().collect(),
            ToolOutput::SingleFile(single) => vec![&single.file],
            ToolOutput::Failure(_) => Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        match self {
            ToolOutput::FileBatch(batch) => batch.files.is_empty(),
            ToolOutput::SingleFile(single) => !single.success,
            ToolOutput::Failure(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_file_name_alias_decodes() {
        let value = json!({
            "success": true,
            "message": "ok",
            "file": {
                "id": "r-1",
                "file_name": "Quarterly Report",
                "version_number": 2
            }
        });
        let output: ToolOutput = serde_json::from_value(value).unwrap();
        match output {
            ToolOutput::SingleFile(single) => {
                assert_eq!(single.file.name, "Quarterly Report");
                assert_eq!(single.file.version_number, 2);
            }
            other => panic!("expected single-file output, got {other:?}"),
        }
    }

    #[test]
    fn batch_shape_decodes_before_failure() {
        let value = json!({
            "message": "created 2 files",
            "files": [
                {"id": "m-1", "name": "Revenue", "version_number": 1},
                {"id": "m-2", "name": "Churn", "version_number": 1}
            ]
        });
        let output: ToolOutput = serde_json::from_value(value).unwrap();
        assert!(matches!(output, ToolOutput::FileBatch(_)));
        assert_eq!(output.files().len(), 2);
    }

    #[test]
    fn bare_error_decodes_as_failure() {
        let value = json!({"message": "nope", "error": "authz"});
        let output: ToolOutput = serde_json::from_value(value).unwrap();
        assert!(output.is_failure());
        assert!(output.files().is_empty());
    }
}
