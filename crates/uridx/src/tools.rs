//! Tool abstraction shared by the HTTP server and the MCP bridge.
//!
//! A [`Tool`] is a named operation with a JSON Schema for its parameters
//! and an async `execute` that turns a JSON object into a JSON result.
//! [`ToolRegistry::with_builtins`] provides the five built-ins:
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `search` | Semantic search with optional type/tag/prefix filters |
//! | `ingest` | Index a single text body under a uri |
//! | `get` | Fetch a source with its chunks |
//! | `delete` | Remove a source |
//! | `stats` | Index counters |
//!
//! ```text
//!   HTTP POST /tools/{name} ─┐
//!                            ├─▶ ToolRegistry::find ─▶ validate_params ─▶ Tool::execute
//!   MCP tools/call ──────────┘
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use uridx_core::ingest::IngestRequest;
use uridx_core::Error;

use crate::index::Index;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Route segment (`POST /tools/{name}`) and MCP tool name.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    fn is_builtin(&self) -> bool {
        false
    }

    /// Whether the tool only reads the index.
    fn is_read_only(&self) -> bool {
        true
    }

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Everything a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    index: Arc<Index>,
}

impl ToolContext {
    pub fn new(index: Arc<Index>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }
}

/// Serializable tool description for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    Error::InvalidArgument(message.into()).into()
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params[key].as_str().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(invalid(format!("{key} must not be empty"))),
    }
}

/// `limit` as an i64. Integers that do not fit are rejected rather than
/// replaced by the default.
fn limit_param(params: &Value) -> Result<Option<i64>> {
    match &params["limit"] {
        Value::Null => Ok(None),
        value => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid(format!("limit is out of range: {value}"))),
    }
}

fn str_list(params: &Value, key: &str) -> Vec<String> {
    params[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ============ Built-ins ============

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the index by meaning. Returns the best matching chunks with their source uri, title, tags and score."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural language query" },
                "limit": { "type": "integer", "description": "Max results (default from config)" },
                "source_type": { "type": "string", "description": "Only sources of this type, e.g. note" },
                "tags": { "type": "array", "items": { "type": "string" }, "description": "Only sources carrying all of these tags" },
                "uri_prefix": { "type": "string", "description": "Only sources whose uri starts with this prefix" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        let limit = limit_param(&params)?;
        let mut request = ctx.index().search_request(query);
        if let Some(limit) = limit {
            request = request.with_limit(limit);
        }
        if let Some(ty) = params["source_type"].as_str() {
            request = request.with_type(ty);
        }
        if let Some(prefix) = params["uri_prefix"].as_str() {
            request = request.with_uri_prefix(prefix);
        }
        for tag in str_list(&params, "tags") {
            request = request.with_tag(tag);
        }

        let hits = ctx.index().search(&request).await?;
        Ok(json!({ "results": hits }))
    }
}

pub struct IngestTool;

#[async_trait]
impl Tool for IngestTool {
    fn name(&self) -> &str {
        "ingest"
    }

    fn description(&self) -> &str {
        "Add or update an item in the index. The text is split into paragraph chunks; unchanged chunks are not re-embedded."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_uri": { "type": "string", "description": "Unique identifier, e.g. a URL or note://name" },
                "text": { "type": "string", "description": "Content to index" },
                "title": { "type": "string" },
                "source_type": { "type": "string", "default": "note" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "context": { "type": "string", "description": "Free-form provenance, e.g. JSON" },
                "replace": { "type": "boolean", "default": false, "description": "Re-embed every chunk" }
            },
            "required": ["source_uri", "text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let uri = required_str(&params, "source_uri")?;
        let text = required_str(&params, "text")?;

        let mut request = IngestRequest::from_text(uri, text, ctx.index().max_tokens())
            .with_tags(str_list(&params, "tags"));
        if let Some(title) = params["title"].as_str() {
            request = request.with_title(title);
        }
        if let Some(ty) = params["source_type"].as_str() {
            request = request.with_type(ty);
        }
        if let Some(context) = params["context"].as_str() {
            request = request.with_context(context);
        }
        if params["replace"].as_bool().unwrap_or(false) {
            request = request.replacing();
        }

        let summary = ctx.index().ingest(&request).await?;
        Ok(serde_json::to_value(&summary)?)
    }
}

pub struct GetTool;

#[async_trait]
impl Tool for GetTool {
    fn name(&self) -> &str {
        "get"
    }

    fn description(&self) -> &str {
        "Retrieve a source and all of its chunks by uri"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_uri": { "type": "string" }
            },
            "required": ["source_uri"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let uri = required_str(&params, "source_uri")?;
        match ctx.index().get(uri).await? {
            Some(source) => Ok(serde_json::to_value(&source)?),
            None => Err(Error::NotFound(format!("source {uri}")).into()),
        }
    }
}

pub struct DeleteTool;

#[async_trait]
impl Tool for DeleteTool {
    fn name(&self) -> &str {
        "delete"
    }

    fn description(&self) -> &str {
        "Permanently remove a source with its chunks and vectors"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_uri": { "type": "string" }
            },
            "required": ["source_uri"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let uri = required_str(&params, "source_uri")?;
        let deleted = ctx.index().delete(uri).await?;
        Ok(json!({
            "status": if deleted { "deleted" } else { "not_found" },
            "source_uri": uri,
        }))
    }
}

pub struct StatsTool;

#[async_trait]
impl Tool for StatsTool {
    fn name(&self) -> &str {
        "stats"
    }

    fn description(&self) -> &str {
        "Counts of sources, chunks and tags in the index"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(serde_json::to_value(ctx.index().stats().await?)?)
    }
}

// ============ Registry ============

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(IngestTool));
        registry.register(Box::new(GetTool));
        registry.register(Box::new(DeleteTool));
        registry.register(Box::new(StatsTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

// ============ Parameter validation ============

/// Check `params` against a tool's schema: required keys present, declared
/// types respected, defaults filled in. Returns the normalized object.
/// Failures are [`Error::InvalidArgument`].
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut result = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(invalid(format!(
                "parameters must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    for field in required.iter().filter_map(|v| v.as_str()) {
        if !result.contains_key(field) {
            return Err(invalid(format!("missing required parameter: {field}")));
        }
    }

    for (name, prop) in &properties {
        match result.get(name) {
            Some(value) => {
                let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                    continue;
                };
                let ok = match expected {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !ok {
                    return Err(invalid(format!(
                        "parameter '{}' must be of type '{}', got {}",
                        name,
                        expected,
                        json_type_name(value)
                    )));
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
