use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Which `Store` backend [`CompactionEngine`] and friends run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    File,
    Dynamodb,
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::File
    }
}

/// Top-level runtime configuration (`agentcore.toml` + `AGENTCORE_*` env
/// overrides). Mirrors the shape of the config a single process needs to
/// stand up a store, a compaction engine and a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCoreConfig {
    #[serde(default)]
    pub memory_type: MemoryType,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    pub memory_id: Option<String>,
    pub aws_region: Option<String>,
    #[serde(default)]
    pub dynamodb: DynamoDbConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub assistants: AssistantsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for AgentCoreConfig {
    fn default() -> Self {
        Self {
            memory_type: MemoryType::default(),
            sessions_dir: default_sessions_dir(),
            memory_id: None,
            aws_region: None,
            dynamodb: DynamoDbConfig::default(),
            compaction: CompactionConfig::default(),
            assistants: AssistantsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Table bindings for the cloud (`Dynamodb`) backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DynamoDbConfig {
    pub sessions_metadata_table_name: Option<String>,
    pub cost_summary_table_name: Option<String>,
    pub system_rollup_table_name: Option<String>,
}

/// Two-stage compaction thresholds, overridable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_token_threshold")]
    pub token_threshold: u64,
    #[serde(default = "default_protected_turns")]
    pub protected_turns: usize,
    #[serde(default = "default_max_tool_content_length")]
    pub max_tool_content_length: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_threshold: default_token_threshold(),
            protected_turns: default_protected_turns(),
            max_tool_content_length: default_max_tool_content_length(),
        }
    }
}

/// RAG context service bindings (vector index + document bucket).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssistantsConfig {
    pub vector_store_index_name: Option<String>,
    pub documents_bucket_name: Option<String>,
}

/// HTTP/SSE surface config for the `agentcore-gateway` binary. Request
/// authentication is out of scope here — spec §1 treats `POST /v1/turns`
/// as sitting behind an already-authenticated boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            provider: ProviderConfig::default(),
        }
    }
}

/// Which model a turn runs against absent a per-request override, and where
/// to reach the provider. The API key itself is read from the provider's
/// own environment variable at startup, not stored in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    pub anthropic_base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            anthropic_base_url: None,
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn bool_true() -> bool {
    true
}
fn default_token_threshold() -> u64 {
    100_000
}
fn default_protected_turns() -> usize {
    2
}
fn default_max_tool_content_length() -> usize {
    500
}
fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_sessions_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.agentcore/sessions", home)
}

impl AgentCoreConfig {
    /// Load config from a TOML file with `AGENTCORE_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `AGENTCORE_CONFIG` env var
    ///   3. `~/.agentcore/agentcore.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("AGENTCORE_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: AgentCoreConfig = Figment::from(figment::providers::Serialized::defaults(
            AgentCoreConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("AGENTCORE_").split("__"))
        .extract()
        .map_err(|e| crate::error::AgentCoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.agentcore/agentcore.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_compaction_thresholds() {
        let cfg = AgentCoreConfig::default();
        assert!(cfg.compaction.enabled);
        assert_eq!(cfg.compaction.token_threshold, 100_000);
        assert_eq!(cfg.compaction.protected_turns, 2);
        assert_eq!(cfg.compaction.max_tool_content_length, 500);
        assert_eq!(cfg.memory_type, MemoryType::File);
    }

    #[test]
    fn load_falls_back_to_defaults_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cfg = AgentCoreConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.gateway.port, 8080);
    }

    #[test]
    fn env_overrides_nested_fields() {
        std::env::set_var("AGENTCORE_COMPACTION__TOKEN_THRESHOLD", "5000");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cfg = AgentCoreConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.compaction.token_threshold, 5000);
        std::env::remove_var("AGENTCORE_COMPACTION__TOKEN_THRESHOLD");
    }
}
