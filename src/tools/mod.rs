//! MCP tool parameters
//!
//! Tools are dispatched in `server.rs`; this module holds their parameter
//! types and the JSON schemas derived from them.

use std::sync::Arc;

use rmcp::model::JsonObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `exec` and `exec-elevated` tools
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ExecParams {
    /// Shell command to execute in the remote shell
    pub command: String,

    /// Timeout in seconds (defaults to the server's --timeout)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Parameters for the `getenv` tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GetEnvParams {
    /// Environment variable name
    pub name: String,
}

/// Parameters for the `cache-stats` tool
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct CacheStatsParams {}

/// JSON schema of `T` as an MCP tool input schema
pub fn input_schema<T: JsonSchema>() -> Arc<JsonObject> {
    let schema = schemars::schema_for!(T);
    let object = serde_json::to_value(schema)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default();
    Arc::new(object)
}
