use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service settings, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub git_bin: PathBuf,
    pub svn_bin: PathBuf,
    pub vcs_timeout: Duration,
    pub history_throttle: Duration,
    pub ai_header_timeout: Duration,
    pub ai_model: String,
    pub default_repo: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            git_bin: "git".into(),
            svn_bin: "svn".into(),
            vcs_timeout: Duration::from_secs(60),
            history_throttle: Duration::from_millis(1000),
            ai_header_timeout: Duration::from_secs(30),
            ai_model: "deepseek-chat".into(),
            default_repo: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_address: var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            git_bin: var("GIT_BIN").map(PathBuf::from).unwrap_or(defaults.git_bin),
            svn_bin: var("SVN_BIN").map(PathBuf::from).unwrap_or(defaults.svn_bin),
            vcs_timeout: parse_or(var("VCS_COMMAND_TIMEOUT_SECS"), "VCS_COMMAND_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.vcs_timeout),
            history_throttle: parse_or(var("HISTORY_THROTTLE_MS"), "HISTORY_THROTTLE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.history_throttle),
            ai_header_timeout: parse_or(var("AI_HEADER_TIMEOUT_SECS"), "AI_HEADER_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.ai_header_timeout),
            ai_model: var("AI_MODEL").unwrap_or(defaults.ai_model),
            default_repo: var("DEFAULT_REPO_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a number, got '{}'", name, v))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.history_throttle, Duration::from_millis(1000));
        assert_eq!(config.ai_header_timeout, Duration::from_secs(30));
        assert_eq!(config.vcs_timeout, Duration::from_secs(60));
        assert!(config.default_repo.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("SVN_BIN", "/opt/svn/bin/svn"),
            ("HISTORY_THROTTLE_MS", "250"),
            ("AI_MODEL", "gpt-4o-mini"),
            ("DEFAULT_REPO_PATH", "/src/project"),
        ]))
        .unwrap();
        assert_eq!(config.svn_bin, PathBuf::from("/opt/svn/bin/svn"));
        assert_eq!(config.history_throttle, Duration::from_millis(250));
        assert_eq!(config.ai_model, "gpt-4o-mini");
        assert_eq!(config.default_repo, Some(PathBuf::from("/src/project")));
    }

    #[test]
    fn test_bad_number_fails() {
        let err = ServiceConfig::from_lookup(lookup(&[("VCS_COMMAND_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("VCS_COMMAND_TIMEOUT_SECS"));
    }
}
