use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ResourceType, ToolCall, ToolError, ToolExecutor, ToolOutput};

/// Serves resource tools from an exported JSON snapshot of a search service:
///
/// ```json
/// { "indexes": [{"name": "hotels", "fields": []}], "indexers": [] }
/// ```
///
/// Collections use the REST API names (`indexes`, `indexers`, `datasources`,
/// `skillsets`, `synonymmaps`, `aliases`); missing collections are empty.
#[derive(Debug, Clone, Default)]
pub struct SnapshotExecutor {
    resources: HashMap<ResourceType, Vec<Value>>,
}

impl SnapshotExecutor {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read resource snapshot {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse resource snapshot {}", path.display()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(root) = value else {
            anyhow::bail!("resource snapshot must be a JSON object");
        };

        let mut resources = HashMap::new();
        for resource_type in ResourceType::ALL {
            let items = match root.get(resource_type.collection()) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(_) => anyhow::bail!(
                    "'{}' in resource snapshot must be an array",
                    resource_type.collection()
                ),
            };
            resources.insert(resource_type, items);
        }

        tracing::debug!(
            indexes = resources.get(&ResourceType::Index).map_or(0, Vec::len),
            "Loaded resource snapshot"
        );
        Ok(Self { resources })
    }

    fn items(&self, resource_type: ResourceType) -> &[Value] {
        self.resources
            .get(&resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn resource_name(item: &Value) -> Option<&str> {
    item.get("name").and_then(Value::as_str)
}

#[async_trait]
impl ToolExecutor for SnapshotExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        match call {
            ToolCall::List { resource_type } => {
                let names: Vec<&str> = self.items(*resource_type).iter().filter_map(resource_name).collect();
                Ok(ToolOutput {
                    label: format!("{} {}", names.len(), resource_type.collection()),
                    data: json!({
                        "resource_type": resource_type.as_str(),
                        "names": names,
                    }),
                })
            }
            ToolCall::Read { resource_type, name } => {
                let item = self
                    .items(*resource_type)
                    .iter()
                    .find(|item| resource_name(item) == Some(name.as_str()))
                    .ok_or_else(|| ToolError::NotFound {
                        resource_type: *resource_type,
                        name: name.clone(),
                    })?;
                Ok(ToolOutput {
                    label: format!("{resource_type} {name}"),
                    data: item.clone(),
                })
            }
        }
    }
}
