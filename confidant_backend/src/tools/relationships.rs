//! Relationship memory tools.
//!
//! - `add_relationship_note`: remember something about a person.
//! - `get_relationship_notes`: recall a person by name or by relationship type.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::relationships::{infer_relationship_type, RelationshipMemory, RelationshipRecord};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

fn record_json(record: &RelationshipRecord, found_by: &str) -> Value {
    json!({
        "success": true,
        "name": record.name,
        "relationship": record.relationship_type,
        "notes": record.notes,
        "found_by": found_by,
    })
}

pub struct AddRelationshipNoteTool {
    memory: Arc<RelationshipMemory>,
}

impl AddRelationshipNoteTool {
    pub fn new(memory: Arc<RelationshipMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for AddRelationshipNoteTool {
    fn name(&self) -> &str {
        "add_relationship_note"
    }

    fn description(&self) -> &str {
        "Add or update information about someone the user mentions: new people, \
         relationship changes, life updates, or any significant detail worth remembering. \
         Examples: 'My friend Sarah is getting married', 'I have a new therapist named Dr. Smith'. \
         Don't announce when you're using this tool - just naturally remember the information."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The person's name"
                },
                "relationship_type": {
                    "type": "string",
                    "description": "Their relationship to the user (friend, family, colleague, therapist, pet, partner, ...)"
                },
                "note": {
                    "type": "string",
                    "description": "What to remember about this person"
                }
            },
            "required": ["name", "relationship_type", "note"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let name = match params.get("name").and_then(Value::as_str).map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Ok(ToolOutput::Error(
                    "Missing required 'name' parameter".to_string(),
                ))
            }
        };
        let relationship_type = params
            .get("relationship_type")
            .and_then(Value::as_str)
            .unwrap_or("");
        let note = params.get("note").and_then(Value::as_str).unwrap_or("");

        let record = match self.memory.add_note(name, relationship_type, note) {
            Ok(record) => record,
            Err(e) => {
                return Ok(ToolOutput::Error(format!(
                    "Failed to save relationship note: {}",
                    e
                )))
            }
        };

        tracing::debug!("Relationship note saved for '{}'", record.key);
        Ok(ToolOutput::Json(json!({
            "success": true,
            "name": record.name,
            "relationship_type": record.relationship_type,
            "note": note.trim(),
            "total_notes": record.notes.len(),
            "message": format!("Added note for {}", record.name),
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }
}

pub struct GetRelationshipNotesTool {
    memory: Arc<RelationshipMemory>,
}

impl GetRelationshipNotesTool {
    pub fn new(memory: Arc<RelationshipMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for GetRelationshipNotesTool {
    fn name(&self) -> &str {
        "get_relationship_notes"
    }

    fn description(&self) -> &str {
        "Look up what you remember about someone the user asks about, e.g. 'Tell me about Sarah', \
         'Do you remember my therapist?'. Search by a person's name ('Sarah') or by relationship \
         type ('mom', 'therapist', 'friend'). Don't announce when you're using this tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The person's name OR their relationship type (e.g. 'Sarah', 'mom', 'therapist', 'dog')"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = match params.get("name").and_then(Value::as_str).map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(ToolOutput::Error("Name cannot be empty".to_string())),
        };

        // 1. exact name
        match self.memory.get_notes(query) {
            Ok(Some(record)) => return Ok(ToolOutput::Json(record_json(&record, "name"))),
            Ok(None) => {}
            Err(e) => {
                return Ok(ToolOutput::Error(format!(
                    "Error retrieving relationship notes: {}",
                    e
                )))
            }
        }

        // 2. relationship type
        let matches = match self.memory.find_by_relationship_type(query) {
            Ok(matches) => matches,
            Err(e) => {
                return Ok(ToolOutput::Error(format!(
                    "Error retrieving relationship notes: {}",
                    e
                )))
            }
        };
        if let Some(first) = matches.first() {
            let mut result = record_json(first, "relationship_type");
            if matches.len() > 1 {
                result["other_matches"] =
                    json!(matches[1..].iter().map(|r| r.name.as_str()).collect::<Vec<_>>());
            }
            return Ok(ToolOutput::Json(result));
        }

        // 3. not found: seed an empty record typed from recent context
        let inferred = infer_relationship_type(&ctx.recent_messages.join(" "));
        match self.memory.add_note(query, inferred, "") {
            Ok(record) => tracing::debug!(
                "Created empty relationship record '{}' ({})",
                record.key,
                inferred
            ),
            Err(e) => tracing::warn!("Could not create relationship stub for '{}': {:#}", query, e),
        }

        Ok(ToolOutput::Json(json!({
            "success": true,
            "name": query,
            "relationship": Value::Null,
            "notes": [],
            "found_by": "not_found",
            "message": format!("No information found about {}", query),
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tools() -> (TempDir, Arc<RelationshipMemory>, AddRelationshipNoteTool, GetRelationshipNotesTool) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(RelationshipMemory::new(dir.path()).unwrap());
        let add = AddRelationshipNoteTool::new(memory.clone());
        let get = GetRelationshipNotesTool::new(memory.clone());
        (dir, memory, add, get)
    }

    fn json_output(output: ToolOutput) -> Value {
        match output {
            ToolOutput::Json(v) => v,
            other => panic!("expected json output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn add_requires_name() {
        let (_dir, _memory, add, _get) = tools();
        let output = add
            .execute(json!({"name": "  ", "relationship_type": "friend", "note": "x"}), &ToolContext::new("c"))
            .await
            .unwrap();
        assert_eq!(
            output,
            ToolOutput::Error("Missing required 'name' parameter".to_string())
        );
    }

    #[tokio::test]
    async fn lookup_by_name_first() {
        let (_dir, _memory, add, get) = tools();
        let ctx = ToolContext::new("c");
        add.execute(
            json!({"name": "Sarah", "relationship_type": "friend", "note": "Got promoted"}),
            &ctx,
        )
        .await
        .unwrap();

        let value = json_output(get.execute(json!({"name": "sarah"}), &ctx).await.unwrap());
        assert_eq!(value["found_by"], "name");
        assert_eq!(value["relationship"], "friend");
        assert!(value["notes"][0].as_str().unwrap().ends_with("Got promoted"));
    }

    #[tokio::test]
    async fn falls_back_to_type_search() {
        let (_dir, memory, _add, get) = tools();
        memory.add_note("Linda", "mom", "Retired in May").unwrap();
        memory.add_note("Carl", "father", "").unwrap();

        let value = json_output(
            get.execute(json!({"name": "family"}), &ToolContext::new("c"))
                .await
                .unwrap(),
        );
        assert_eq!(value["found_by"], "relationship_type");
        assert_eq!(value["name"], "Carl");
        assert_eq!(value["other_matches"], json!(["Linda"]));
    }

    #[tokio::test]
    async fn unknown_person_gets_stub_with_inferred_type() {
        let (_dir, memory, _add, get) = tools();
        let ctx = ToolContext::new("c")
            .with_recent_messages(vec!["I saw my therapist today".to_string()]);

        let value = json_output(get.execute(json!({"name": "Mervin"}), &ctx).await.unwrap());
        assert_eq!(value["found_by"], "not_found");
        assert!(value["notes"].as_array().unwrap().is_empty());

        let stub = memory.get_notes("Mervin").unwrap().unwrap();
        assert_eq!(stub.relationship_type, "therapist");
        assert!(stub.notes.is_empty());
    }
}
