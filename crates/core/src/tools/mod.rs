//! Read-only resource tools the assistant may call before answering.
//!
//! The model sees two functions, `resource_list` and `resource_read`. Their
//! arguments arrive as raw JSON text and are only parsed here, when a call is
//! about to be dispatched to a [`ToolExecutor`].

pub mod snapshot;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use searchdesk_provider::{FunctionCall, ToolDefinition};

pub const RESOURCE_LIST: &str = "resource_list";
pub const RESOURCE_READ: &str = "resource_read";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("no {resource_type} named '{name}'")]
    NotFound {
        resource_type: ResourceType,
        name: String,
    },

    #[error("tool execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Index,
    Indexer,
    Datasource,
    Skillset,
    Synonymmap,
    Alias,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Index,
        ResourceType::Indexer,
        ResourceType::Datasource,
        ResourceType::Skillset,
        ResourceType::Synonymmap,
        ResourceType::Alias,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Index => "index",
            ResourceType::Indexer => "indexer",
            ResourceType::Datasource => "datasource",
            ResourceType::Skillset => "skillset",
            ResourceType::Synonymmap => "synonymmap",
            ResourceType::Alias => "alias",
        }
    }

    /// Collection name as used by the Azure AI Search REST API.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceType::Index => "indexes",
            ResourceType::Indexer => "indexers",
            ResourceType::Datasource => "datasources",
            ResourceType::Skillset => "skillsets",
            ResourceType::Synonymmap => "synonymmaps",
            ResourceType::Alias => "aliases",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    resource_type: ResourceType,
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    resource_type: ResourceType,
    name: String,
}

/// A recognized, well-formed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    List {
        resource_type: ResourceType,
    },
    Read {
        resource_type: ResourceType,
        name: String,
    },
}

impl ToolCall {
    pub fn parse(call: &FunctionCall) -> Result<Self, ToolError> {
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: call.name.clone(),
            reason: e.to_string(),
        };
        let args = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };

        match call.name.as_str() {
            RESOURCE_LIST => {
                let a: ListArgs = serde_json::from_str(args).map_err(invalid)?;
                Ok(ToolCall::List {
                    resource_type: a.resource_type,
                })
            }
            RESOURCE_READ => {
                let a: ReadArgs = serde_json::from_str(args).map_err(invalid)?;
                if a.name.trim().is_empty() {
                    return Err(ToolError::InvalidArguments {
                        tool: call.name.clone(),
                        reason: "name must not be empty".into(),
                    });
                }
                Ok(ToolCall::Read {
                    resource_type: a.resource_type,
                    name: a.name,
                })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::List { .. } => RESOURCE_LIST,
            ToolCall::Read { .. } => RESOURCE_READ,
        }
    }

    /// Human-readable description, e.g. "Reading index hotels".
    pub fn describe(&self) -> String {
        match self {
            ToolCall::List { resource_type } => format!("Listing {}", resource_type.collection()),
            ToolCall::Read { resource_type, name } => format!("Reading {resource_type} {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub label: String,
    pub data: Value,
}

/// Performs the actual lookup. Implementations must not modify remote state
/// and must tolerate repeated calls.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput>;
}

fn resource_type_schema() -> Value {
    let names: Vec<&str> = ResourceType::ALL.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "string",
        "enum": names,
        "description": "Kind of Azure AI Search resource"
    })
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: RESOURCE_LIST.into(),
            description: "List the names of all resources of one type on the connected search service.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "resource_type": resource_type_schema(),
                },
                "required": ["resource_type"]
            }),
        },
        ToolDefinition {
            name: RESOURCE_READ.into(),
            description: "Read the full definition of one resource by type and name.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "resource_type": resource_type_schema(),
                    "name": {"type": "string", "description": "Resource name"}
                },
                "required": ["resource_type", "name"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &str) -> FunctionCall {
        FunctionCall {
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn parses_both_tools() {
        assert_eq!(
            ToolCall::parse(&call("resource_list", r#"{"resource_type":"skillset"}"#)).unwrap(),
            ToolCall::List { resource_type: ResourceType::Skillset }
        );
        let read = ToolCall::parse(&call(
            "resource_read",
            r#"{"resource_type":"index","name":"hotels"}"#,
        ))
        .unwrap();
        assert_eq!(read.describe(), "Reading index hotels");
        assert_eq!(read.name(), RESOURCE_READ);
    }

    #[test]
    fn rejects_bad_arguments() {
        for (name, args) in [
            ("resource_list", "{\"resource_type\":"),
            ("resource_list", r#"{"resource_type":"table"}"#),
            ("resource_read", r#"{"resource_type":"index"}"#),
            ("resource_read", r#"{"resource_type":"index","name":" "}"#),
            ("resource_list", ""),
        ] {
            assert!(
                matches!(
                    ToolCall::parse(&call(name, args)),
                    Err(ToolError::InvalidArguments { .. })
                ),
                "{name} {args}"
            );
        }
    }

    #[test]
    fn unknown_tool_is_reported() {
        assert!(matches!(
            ToolCall::parse(&call("delete_index", "{}")),
            Err(ToolError::UnknownTool(name)) if name == "delete_index"
        ));
    }

    #[test]
    fn definitions_enumerate_resource_types() {
        let defs = definitions();
        assert_eq!(defs.len(), 2);
        let types = &defs[1].parameters["properties"]["resource_type"]["enum"];
        assert_eq!(types.as_array().unwrap().len(), ResourceType::ALL.len());
        assert_eq!(defs[1].parameters["required"], json!(["resource_type", "name"]));
    }
}
