use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Name of the person the agent keeps a relationship with.  Seeds the
    /// identity core on first start and addresses outbound email.
    pub partner_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Continuum".to_string(),
            partner_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub openrouter_model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    /// Upper bound on a single generative call, in seconds.
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "anthropic/claude-3.5-sonnet".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 120,
            max_tokens: 4000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// `redb` (on-disk, the default) or `memory` (volatile, for demos and tests).
    pub backend: String,
    /// Path of the redb database file.  Overridden by `CONTINUUM_DATA_PATH`.
    pub data_path: String,
    /// Number of recent memories loaded at session start.
    pub recent_limit: usize,
    /// Number of high-priority memories loaded at session start.
    pub high_priority_limit: usize,
    /// Characters of memory content kept in each invocation-context view.
    pub preview_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: "redb".to_string(),
            data_path: ".continuum/continuum.redb".to_string(),
            recent_limit: 10,
            high_priority_limit: 5,
            preview_chars: 100,
        }
    }
}

/// Outbound mail.  When `enabled` is false (or the binary was built without
/// the `smtp` feature) messages are written to the log instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    /// Can also be set via `SMTP_PASSWORD` env var (env takes precedence).
    pub password: String,
    pub from: String,
    pub to: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    /// Socket address for the HTTP surface.  The `PORT` env var replaces the
    /// port component.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    /// IANA timezone used to evaluate cron schedules.  Falls back to UTC when
    /// the name is unrecognised.
    pub timezone: String,
    /// Scheduler resolution in seconds.
    pub tick_seconds: u64,
    /// Upsert the built-in daily triggers at startup.
    pub seed_defaults: bool,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Madrid".to_string(),
            tick_seconds: 30,
            seed_defaults: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Directory for daily rolling log files.  Empty disables file logging.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub email: EmailConfig,
    pub server: ServerConfig,
    pub triggers: TriggersConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.llm.provider = "ollama".to_string();
                config.llm.ollama_base_url = value;
            }
        }

        if let Ok(value) = env::var("CONTINUUM_DATA_PATH") {
            if !value.is_empty() {
                config.memory.data_path = value;
            }
        }

        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                let host = config
                    .server
                    .bind
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "127.0.0.1".to_string());
                config.server.bind = format!("{host}:{port}");
            }
        }

        if let Ok(password) = env::var("SMTP_PASSWORD") {
            if !password.is_empty() {
                config.email.password = password;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("openrouter") {
            &self.llm.openrouter_model
        } else {
            &self.llm.ollama_model
        }
    }

    pub fn uses_volatile_store(&self) -> bool {
        self.memory.backend.eq_ignore_ascii_case("memory")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.name, "Continuum");
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.llm.ollama_base_url, "http://localhost:11434");
        assert_eq!(cfg.llm.request_timeout_secs, 120);
        assert_eq!(cfg.memory.backend, "redb");
        assert_eq!(cfg.memory.recent_limit, 10);
        assert_eq!(cfg.memory.high_priority_limit, 5);
        assert_eq!(cfg.memory.preview_chars, 100);
        assert!(!cfg.email.enabled);
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
        assert_eq!(cfg.triggers.timezone, "Europe/Madrid");
        assert!(cfg.triggers.seed_defaults);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(cfg.telemetry.log_dir.is_empty());
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.agent.name, "Continuum");
        assert_eq!(cfg.memory.recent_limit, 10);
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[agent]
name = "Nova"
partner_name = "Alice"

[llm]
ollama_model = "custom:7b"
openrouter_model = "openai/gpt-4o"
request_timeout_secs = 30

[memory]
backend = "memory"
recent_limit = 20

[triggers]
timezone = "America/New_York"
tick_seconds = 5
seed_defaults = false
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.agent.name, "Nova");
        assert_eq!(cfg.agent.partner_name, "Alice");
        assert_eq!(cfg.llm.ollama_model, "custom:7b");
        assert_eq!(cfg.llm.openrouter_model, "openai/gpt-4o");
        assert_eq!(cfg.llm.request_timeout_secs, 30);
        assert!(cfg.uses_volatile_store());
        assert_eq!(cfg.memory.recent_limit, 20);
        // Unspecified fields within a section keep their defaults
        assert_eq!(cfg.memory.high_priority_limit, 5);
        assert_eq!(cfg.triggers.timezone, "America/New_York");
        assert_eq!(cfg.triggers.tick_seconds, 5);
        assert!(!cfg.triggers.seed_defaults);
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[agent]
name = "Partial"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.agent.name, "Partial");
        assert_eq!(cfg.memory.preview_chars, 100);
        assert_eq!(cfg.triggers.timezone, "Europe/Madrid");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.agent.name = "RoundTrip".to_string();
        cfg.llm.openrouter_model = "meta/llama-3".to_string();
        cfg.memory.preview_chars = 64;
        cfg.email.to = "someone@example.com".to_string();
        cfg.telemetry.log_dir = "/var/log/continuum".to_string();

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.agent.name, "RoundTrip");
        assert_eq!(loaded.llm.openrouter_model, "meta/llama-3");
        assert_eq!(loaded.memory.preview_chars, 64);
        assert_eq!(loaded.email.to, "someone@example.com");
        assert_eq!(loaded.telemetry.log_dir, "/var/log/continuum");
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/config.toml");
        AppConfig::default().save_to(&path).unwrap();
        assert!(path.exists());
    }

    // ── active_model ───────────────────────────────────────────────────────

    #[test]
    fn active_model_follows_provider() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.active_model(), "llama3.1:8b");
        cfg.llm.provider = "OpenRouter".to_string();
        assert_eq!(cfg.active_model(), "anthropic/claude-3.5-sonnet");
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    #[test]
    fn env_ollama_base_url_forces_ollama_provider() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[llm]
provider = "openrouter"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("OLLAMA_BASE_URL", "http://custom:11434") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.llm.ollama_base_url, "http://custom:11434");
        unsafe { env::remove_var("OLLAMA_BASE_URL") };
    }

    #[test]
    fn env_data_path_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.toml");
        fs::write(
            &path,
            r#"
[memory]
data_path = "from-file.redb"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("CONTINUUM_DATA_PATH", "/tmp/from-env.redb") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.memory.data_path, "/tmp/from-env.redb");
        unsafe { env::remove_var("CONTINUUM_DATA_PATH") };
    }

    #[test]
    fn env_port_replaces_bind_port_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("port.toml");
        fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:3000"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("PORT", "8088") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8088");
        unsafe { env::remove_var("PORT") };
    }

    #[test]
    fn env_smtp_password_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("smtp.toml");
        fs::write(
            &path,
            r#"
[email]
password = "from-file"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("SMTP_PASSWORD", "from-env") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.email.password, "from-env");
        unsafe { env::remove_var("SMTP_PASSWORD") };
    }
}
