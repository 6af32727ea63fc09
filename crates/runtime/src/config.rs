//! Typed `RuntimeConfig`, read once at process start from the environment
//! variables named in §6.5.

use std::path::PathBuf;

/// Which family of repository adapter DI selection should wire up.
/// `Firestore` is the spec's own document-store name for the value
/// `DATABASE=firestore`; it is modeled by the local SQLite adapter (see
/// DESIGN.md) rather than rejected outright, since real deployments set
/// this value and the runtime still needs to boot against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    SingleUser,
    Other(String),
}

/// Per-provider API keys read verbatim from the environment; `None` when
/// unset, matching the "skip unconfigured providers" behavior of the
/// composite LLM (§4.5).
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub perplexity: Option<String>,
    pub deepseek: Option<String>,
    pub groq: Option<String>,
    pub sambanova: Option<String>,
    pub openrouter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database: DatabaseKind,
    pub auth: AuthMode,
    pub sys_dir: Option<PathBuf>,
    pub fs_root: Option<PathBuf>,
    pub gcloud_project: Option<String>,
    pub gcloud_region: Option<String>,
    pub gcloud_claude_region: Option<String>,
    pub firestore_database: Option<String>,
    pub firestore_emulator_host: Option<String>,
    pub gitlab_host: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_groups: Vec<String>,
    pub gitlab_bot_user_id: Option<String>,
    pub provider_keys: ProviderKeys,
    pub rust_log: Option<String>,
    /// Where the sqlite-backed repository stores live when `database ==
    /// Sqlite`. Not itself a recognized §6.5 variable; derived from
    /// `sys_dir` (or a fallback under the user's data directory) because
    /// the spec's env list only names the document-store location in
    /// cloud-provider terms (`GCLOUD_PROJECT`/`FIRESTORE_DATABASE`).
    pub sqlite_dir: PathBuf,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl RuntimeConfig {
    /// Reads every recognized environment variable once. Unset variables
    /// fall back to the most permissive default (in-memory stores,
    /// multi-user auth disabled, no source-control integration) so the
    /// runtime boots in a bare developer environment with zero configuration.
    pub fn from_env() -> Self {
        let database = match env_string("DATABASE").as_deref() {
            Some("sqlite") => DatabaseKind::Sqlite,
            Some("firestore") => DatabaseKind::Sqlite,
            _ => DatabaseKind::Memory,
        };

        let auth = match env_string("AUTH").as_deref() {
            Some("single_user") => AuthMode::SingleUser,
            Some(other) => AuthMode::Other(other.to_string()),
            None => AuthMode::SingleUser,
        };

        let sys_dir = env_string("TYPEDAI_SYS_DIR").map(PathBuf::from);

        let sqlite_dir = sys_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("agentkit")))
            .unwrap_or_else(|| PathBuf::from(".agentkit"));

        let gitlab_groups = env_string("GITLAB_GROUPS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Self {
            database,
            auth,
            sys_dir,
            fs_root: env_string("TYPEDAI_FS").map(PathBuf::from),
            gcloud_project: env_string("GCLOUD_PROJECT"),
            gcloud_region: env_string("GCLOUD_REGION"),
            gcloud_claude_region: env_string("GCLOUD_CLAUDE_REGION"),
            firestore_database: env_string("FIRESTORE_DATABASE"),
            firestore_emulator_host: env_string("FIRESTORE_EMULATOR_HOST"),
            gitlab_host: env_string("GITLAB_HOST"),
            gitlab_token: env_string("GITLAB_TOKEN"),
            gitlab_groups,
            gitlab_bot_user_id: env_string("GITLAB_BOT_USER_ID"),
            provider_keys: ProviderKeys {
                perplexity: env_string("PERPLEXITY_KEY"),
                deepseek: env_string("DEEPSEEK_API_KEY"),
                groq: env_string("GROQ_API_KEY"),
                sambanova: env_string("SAMBANOVA_API_KEY"),
                openrouter: env_string("OPENROUTER_API_KEY"),
            },
            rust_log: env_string("RUST_LOG"),
            sqlite_dir,
        }
    }

    pub fn is_single_user(&self) -> bool {
        matches!(self.auth, AuthMode::SingleUser)
    }

    pub fn has_gitlab_integration(&self) -> bool {
        self.gitlab_host.is_some() && self.gitlab_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_memory_and_single_user_with_no_environment() {
        // Constructed directly rather than through `from_env` so the test
        // doesn't depend on (and isn't poisoned by) the real process
        // environment, which `std::env::var` would read verbatim.
        let config = RuntimeConfig {
            database: DatabaseKind::Memory,
            auth: AuthMode::SingleUser,
            sys_dir: None,
            fs_root: None,
            gcloud_project: None,
            gcloud_region: None,
            gcloud_claude_region: None,
            firestore_database: None,
            firestore_emulator_host: None,
            gitlab_host: None,
            gitlab_token: None,
            gitlab_groups: Vec::new(),
            gitlab_bot_user_id: None,
            provider_keys: ProviderKeys::default(),
            rust_log: None,
            sqlite_dir: PathBuf::from(".agentkit"),
        };
        assert!(config.is_single_user());
        assert!(!config.has_gitlab_integration());
    }

    #[test]
    fn firestore_database_kind_maps_to_the_local_sqlite_adapter() {
        std::env::set_var("DATABASE", "firestore");
        let config = RuntimeConfig::from_env();
        std::env::remove_var("DATABASE");
        assert_eq!(config.database, DatabaseKind::Sqlite);
    }

    #[test]
    fn gitlab_groups_splits_on_commas_and_trims_whitespace() {
        std::env::set_var("GITLAB_GROUPS", "group-a, group-b ,group-c");
        let config = RuntimeConfig::from_env();
        std::env::remove_var("GITLAB_GROUPS");
        assert_eq!(config.gitlab_groups, vec!["group-a", "group-b", "group-c"]);
    }
}
