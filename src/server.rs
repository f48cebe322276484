//! MCP Server implementation
//!
//! Exposes one logical shell session as MCP tools: `exec`, `exec-elevated`,
//! `getenv` and `cache-stats`. The session is initialized on first use and
//! reused for every call.

use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Result, ShellError};
use crate::session::{SessionManager, SessionRegistry, SessionState};
use crate::ssh::{CommandResult, SshConfig};
use crate::tools::{input_schema, CacheStatsParams, ExecParams, GetEnvParams};

/// SSH shell MCP server
#[derive(Clone)]
pub struct SshShellServer {
    config: Config,
    registry: SessionRegistry,
    session: Arc<SessionManager>,
    /// Serializes lazy initialization of `session`
    init_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SshShellServer {
    /// Create the server; the SSH connection is made on the first tool call
    pub async fn new(config: Config, registry: SessionRegistry) -> Result<Self> {
        let ssh_config = build_ssh_config(&config).await?;
        let session = SessionManager::new(ssh_config, registry.clone())
            .with_max_chars(config.max_chars);

        Ok(Self {
            config,
            registry,
            session: Arc::new(session),
            init_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Close the session and every cached connection
    pub async fn shutdown(&self) {
        info!("Shutting down SSH shell MCP server...");
        if let Err(e) = self.session.close().await {
            error!("Failed to close session: {}", e);
        }
        self.registry.close_all_sessions().await;
    }

    async fn ensure_session(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.session.state() == SessionState::Disconnected {
            self.session.initialize().await?;
        }
        Ok(())
    }

    async fn run_exec(&self, params: ExecParams, elevated: bool) -> CallToolResult {
        debug!(
            "{} tool called with command: {}",
            if elevated { "exec-elevated" } else { "exec" },
            params.command
        );

        if let Err(e) = self.ensure_session().await {
            error!("Failed to initialize shell session: {}", e);
            return CallToolResult::error(vec![Content::text(format!("Error: {}", e))]);
        }

        let timeout = params.timeout_secs.unwrap_or(self.config.timeout_secs);
        let result = if elevated {
            self.session.execute_elevated(&params.command, timeout).await
        } else {
            self.session.execute(&params.command, timeout).await
        };

        match result {
            Ok(output) => command_result(output),
            Err(e) => {
                error!("Command execution failed: {}", e);
                CallToolResult::error(vec![Content::text(format!("Error: {}", e))])
            }
        }
    }

    async fn run_getenv(&self, params: GetEnvParams) -> CallToolResult {
        if let Err(e) = self.ensure_session().await {
            return CallToolResult::error(vec![Content::text(format!("Error: {}", e))]);
        }
        match self.session.resolve_environment_variable(&params.name).await {
            Ok(value) => CallToolResult::success(vec![Content::text(value)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!("Error: {}", e))]),
        }
    }

    fn exec_tool() -> Tool {
        Tool::new(
            "exec",
            "Execute a shell command in the persistent remote shell and return its output and exit code.",
            input_schema::<ExecParams>(),
        )
    }

    fn exec_elevated_tool() -> Tool {
        Tool::new(
            "exec-elevated",
            "Execute a shell command through sudo in the persistent remote shell. Uses the sudo password if provided, otherwise assumes passwordless sudo.",
            input_schema::<ExecParams>(),
        )
    }

    fn getenv_tool() -> Tool {
        Tool::new(
            "getenv",
            "Read an environment variable from the remote shell.",
            input_schema::<GetEnvParams>(),
        )
    }

    fn cache_stats_tool() -> Tool {
        Tool::new(
            "cache-stats",
            "Show cached shell connections.",
            input_schema::<CacheStatsParams>(),
        )
    }
}

/// Build the library's SSH configuration, reading the key file if given
async fn build_ssh_config(config: &Config) -> Result<SshConfig> {
    let mut ssh_config = SshConfig::new(&config.host, &config.user)
        .with_port(config.port)
        .with_switch_command(&config.switch_command)
        .with_purpose(&config.purpose);

    if let Some(ref password) = config.password {
        ssh_config = ssh_config.with_password(password);
    }

    if let Some(ref key_path) = config.key {
        let key_content = tokio::fs::read_to_string(key_path)
            .await
            .map_err(ShellError::Io)?;
        check_private_key(&key_content)?;
        ssh_config = ssh_config.with_private_key(key_content);
    }

    if let Some(ref user) = config.elevate_user {
        ssh_config = ssh_config.with_elevate_user(user);
    }

    if let Some(ref password) = config.elevate_password {
        ssh_config = ssh_config.with_elevate_password(password);
    }

    if let Some(ref password) = config.sudo_password {
        ssh_config = ssh_config.with_sudo_password(password);
    }

    Ok(ssh_config)
}

/// Reject keys that cannot be used without a passphrase
///
/// Keys `ssh-key` cannot decode are passed through; authentication reports
/// the real problem.
fn check_private_key(key_content: &str) -> Result<()> {
    match ssh_key::PrivateKey::from_openssh(key_content) {
        Ok(key) if key.is_encrypted() => Err(ShellError::SshKey(format!(
            "{} key is passphrase-protected, which is not supported",
            key.algorithm()
        ))),
        Ok(key) => {
            debug!("Loaded {} private key", key.algorithm());
            Ok(())
        }
        Err(e) => {
            debug!("Could not pre-validate private key: {}", e);
            Ok(())
        }
    }
}

/// Output text plus exit code; non-zero exit codes are tool errors
fn command_result(output: CommandResult) -> CallToolResult {
    let text = format!("{}\n[exit code: {}]", output.output, output.exit_code);
    if output.is_success() {
        CallToolResult::success(vec![Content::text(text)])
    } else {
        CallToolResult::error(vec![Content::text(text)])
    }
}

fn parse_params<T: DeserializeOwned>(
    arguments: Option<JsonObject>,
) -> std::result::Result<T, McpError> {
    let value = serde_json::Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value)
        .map_err(|e| McpError::invalid_params(format!("Invalid arguments: {}", e), None))
}

impl ServerHandler for SshShellServer {
    /// Return server information
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "SSH shell MCP server v{} - persistent shell on {}@{}:{} (purpose '{}')",
                env!("CARGO_PKG_VERSION"),
                self.config.user,
                self.config.host,
                self.config.port,
                self.config.purpose,
            )),
        }
    }

    /// List available tools
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        debug!("list_tools called");

        let mut tools = vec![Self::exec_tool()];
        if !self.config.disable_elevated {
            tools.push(Self::exec_elevated_tool());
        }
        tools.push(Self::getenv_tool());
        tools.push(Self::cache_stats_tool());

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Call a tool
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let tool_name: &str = request.name.as_ref();
        debug!("call_tool called: {:?}", tool_name);

        match tool_name {
            "exec" => {
                let params: ExecParams = parse_params(request.arguments)?;
                Ok(self.run_exec(params, false).await)
            }
            "exec_elevated" | "exec-elevated" => {
                if self.config.disable_elevated {
                    return Err(McpError::invalid_params(
                        "exec-elevated tool is disabled",
                        None,
                    ));
                }
                let params: ExecParams = parse_params(request.arguments)?;
                Ok(self.run_exec(params, true).await)
            }
            "getenv" => {
                let params: GetEnvParams = parse_params(request.arguments)?;
                Ok(self.run_getenv(params).await)
            }
            "cache-stats" | "cache_stats" => Ok(CallToolResult::success(vec![Content::text(
                self.registry.cache_statistics(),
            )])),
            _ => Err(McpError::invalid_params(
                format!("Unknown tool: {}", tool_name),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions() {
        assert_eq!(SshShellServer::exec_tool().name.as_ref(), "exec");
        assert_eq!(
            SshShellServer::exec_elevated_tool().name.as_ref(),
            "exec-elevated"
        );
        assert!(SshShellServer::getenv_tool().description.is_some());
        assert_eq!(SshShellServer::cache_stats_tool().name.as_ref(), "cache-stats");
    }

    #[test]
    fn test_command_result_maps_exit_code() {
        let ok = command_result(CommandResult::new("hello", 0));
        assert_eq!(ok.is_error, Some(false));

        let failed = command_result(CommandResult::new("", 7));
        assert_eq!(failed.is_error, Some(true));
    }

    #[test]
    fn test_unparsable_key_is_left_to_authentication() {
        assert!(check_private_key("not a key").is_ok());
    }

    #[test]
    fn test_parse_params_rejects_missing_command() {
        let result: std::result::Result<ExecParams, McpError> = parse_params(None);
        assert!(result.is_err());
    }
}
