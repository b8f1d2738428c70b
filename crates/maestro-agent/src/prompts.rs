// ABOUTME: Prompt construction for specialist agents.
// ABOUTME: Builds system prompts, output-schema instructions, RAG blocks, and output JSON schemas.

use serde_json::{Map, Value, json};

use maestro_core::{Agent, FieldSchema, Payload};

use crate::knowledge::KnowledgeEntry;

/// Maximum number of knowledge entries injected into one prompt.
pub const MAX_RAG_ENTRIES: usize = 5;

/// Build the system prompt from the agent's identity, custom prompt and,
/// when declared, an explicit output-schema instruction.
pub fn system_prompt(agent: &Agent) -> String {
    let mut prompt = match agent.role.trim() {
        "" => format!("You are {}.", agent.name),
        role => format!("You are {}, {}.", agent.name, role),
    };
    if !agent.description.trim().is_empty() {
        prompt.push('\n');
        prompt.push_str(agent.description.trim());
    }
    if !agent.system_prompt.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(agent.system_prompt.trim());
    }
    if !agent.output_schema.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&output_schema_instruction(&agent.output_schema));
    }
    prompt
}

/// Describe the declared output fields and instruct the model to return exactly those.
pub fn output_schema_instruction(fields: &[FieldSchema]) -> String {
    let mut lines = vec![
        "Respond with a single JSON object containing exactly these fields and no others:"
            .to_string(),
    ];
    for field in fields {
        let requirement = if field.required { "required" } else { "optional" };
        let mut line = format!("- {} ({}, {})", field.name, field.field_type, requirement);
        if !field.description.is_empty() {
            line.push_str(": ");
            line.push_str(&field.description);
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// JSON Schema for the declared output fields. Every field is listed in
/// `required`; optional fields accept `null` instead of being omitted.
pub fn output_json_schema(fields: &[FieldSchema]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let mut schema = field.field_type.json_schema();
        if !field.required
            && let Some(Value::String(kind)) = schema.get("type").cloned()
        {
            schema["type"] = json!([kind, "null"]);
        }
        if !field.description.is_empty() {
            schema["description"] = json!(field.description);
        }
        properties.insert(field.name.clone(), schema);
    }
    let required: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// Format retrieved knowledge as the block appended after the system prompt.
pub fn rag_block(entries: &[KnowledgeEntry]) -> String {
    let mut block = String::from(
        "\n\n## Knowledge Base (RAG)\nUse the following reference material when relevant:\n",
    );
    for entry in entries.iter().take(MAX_RAG_ENTRIES) {
        block.push_str(&format!("\n### {}\n{}\n", entry.title, entry.content.trim()));
    }
    block
}

/// The user message carrying the resolved input.
pub fn input_message(input: &Payload) -> String {
    let rendered =
        serde_json::to_string_pretty(input).unwrap_or_else(|_| "{}".to_string());
    format!("Input:\n```json\n{}\n```", rendered)
}

/// A text query used for relevance search, derived from the input's string values.
pub fn retrieval_query(input: &Payload) -> String {
    for key in ["query", "question", "prompt", "text", "task", "goal"] {
        if let Some(Value::String(s)) = input.get(key)
            && !s.trim().is_empty()
        {
            return s.clone();
        }
    }
    input
        .values()
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
