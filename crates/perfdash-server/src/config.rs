use anyhow::Context;
use perfdash_common::types::AlertRecord;
use perfdash_issues::IssueTrackerSettings;
use perfdash_query::filter::{DEFAULT_LIMIT, MAX_LIMIT};
use perfdash_query::LimitPolicy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub issue_tracker: IssueTrackerSettings,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database: DatabaseConfig::default(),
            query: QueryConfig::default(),
            issue_tracker: IssueTrackerSettings::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. Parent directories are created on start.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Serve an empty page instead of an error when the store holds an
    /// inconsistent record. Only for clients that depend on that behavior.
    #[serde(default)]
    pub legacy_empty_on_inconsistency: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            legacy_empty_on_inconsistency: false,
        }
    }
}

impl QueryConfig {
    pub fn limit_policy(&self) -> LimitPolicy {
        LimitPolicy {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for caller tokens. A random one is generated when unset.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Email domains whose verified accounts may query recent bugs.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    /// Individual verified accounts allowed in addition to the domains.
    #[serde(default)]
    pub allowed_emails: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            allowed_domains: default_allowed_domains(),
            allowed_emails: Vec::new(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_database_path() -> String {
    "data/alerts.db".to_string()
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_max_limit() -> usize {
    MAX_LIMIT
}

fn default_allowed_domains() -> Vec<String> {
    vec!["chromium.org".to_string(), "google.com".to_string()]
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.query.max_limit == 0 {
            anyhow::bail!("[query].max_limit must be at least 1");
        }
        if self.query.default_limit > self.query.max_limit {
            anyhow::bail!(
                "[query].default_limit ({}) exceeds max_limit ({})",
                self.query.default_limit,
                self.query.max_limit
            );
        }
        if self.issue_tracker.max_attempts == 0 {
            anyhow::bail!("[issue_tracker].max_attempts must be at least 1");
        }
        Ok(())
    }
}

// ---- Seed file types (used by the `init-seed` CLI subcommand) ----

#[derive(Debug, Clone, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub alerts: Vec<AlertRecord>,
    #[serde(default)]
    pub report_templates: Vec<SeedReportTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedReportTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tests: Vec<String>,
}
