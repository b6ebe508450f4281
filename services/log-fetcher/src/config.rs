//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Access tokens are never read from the TOML file; a static token comes from
//! `LOG_FETCHER_ACCESS_TOKEN` or a named environment variable.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::Secret;
use serde::Deserialize;

/// Overrides every configured resolver with a fixed token.
pub const ACCESS_TOKEN_ENV: &str = "LOG_FETCHER_ACCESS_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub query: QueryConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging_api: LoggingApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// What to fetch and how wide to shard it
#[derive(Debug, Deserialize)]
pub struct QueryConfig {
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub filter: String,
    /// RFC 3339
    pub start_time: String,
    /// RFC 3339
    pub end_time: String,
    #[serde(default = "default_segment_count")]
    pub segment_count: usize,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_launch_stagger_secs")]
    pub launch_stagger_secs: u64,
    /// NDJSON output file; stdout when absent
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Write entries as they arrive instead of sorted at the end
    #[serde(default)]
    pub stream_unsorted: bool,
    #[serde(skip)]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_min_wait_secs")]
    pub min_wait_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_retriable_status_codes")]
    pub retriable_status_codes: Vec<u16>,
    #[serde(default = "default_auth_retriable_status_codes")]
    pub auth_retriable_status_codes: Vec<u16>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            min_wait_secs: default_min_wait_secs(),
            max_wait_secs: default_max_wait_secs(),
            max_retry_count: default_max_retry_count(),
            retriable_status_codes: default_retriable_status_codes(),
            auth_retriable_status_codes: default_auth_retriable_status_codes(),
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> transport::RetryConfig {
        transport::RetryConfig {
            min_wait: Duration::from_secs(self.min_wait_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
            max_retry_count: self.max_retry_count,
            retriable_status_codes: self.retriable_status_codes.iter().copied().collect(),
            auth_retriable_status_codes: self.auth_retriable_status_codes.iter().copied().collect(),
        }
    }
}

/// One credential source, tried in the order listed
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolverConfig {
    /// Token read from an environment variable on every resolve
    Env { var: String },
    MetadataServer {
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        service_account: Option<String>,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Interactive {
        client_id: String,
        /// Environment variable holding the client secret, if the client has one
        #[serde(default)]
        client_secret_env: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_resolvers")]
    pub resolvers: Vec<ResolverConfig>,
    #[serde(default)]
    pub quota_project: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(skip)]
    pub access_token_override: Option<Secret<String>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            resolvers: default_resolvers(),
            quota_project: None,
            headers: Vec::new(),
            access_token_override: None,
        }
    }
}

/// Extra header sent with every API request
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

impl From<&HeaderEntry> for transport::HeaderInjection {
    fn from(entry: &HeaderEntry) -> Self {
        transport::HeaderInjection {
            name: entry.name.clone(),
            value: entry.value.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LoggingApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics` here while the query runs
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

fn default_segment_count() -> usize {
    8
}

fn default_pool_size() -> usize {
    4
}

fn default_launch_stagger_secs() -> u64 {
    3
}

fn default_min_wait_secs() -> u64 {
    1
}

fn default_max_wait_secs() -> u64 {
    30
}

fn default_max_retry_count() -> u32 {
    5
}

fn default_retriable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_auth_retriable_status_codes() -> Vec<u16> {
    vec![401, 403]
}

fn default_resolvers() -> Vec<ResolverConfig> {
    vec![
        ResolverConfig::Env {
            var: "CLOUDSDK_AUTH_ACCESS_TOKEN".into(),
        },
        ResolverConfig::MetadataServer {
            base_url: None,
            service_account: None,
        },
        ResolverConfig::Command {
            program: "gcloud".into(),
            args: vec!["auth".into(), "print-access-token".into()],
        },
    ]
}

fn default_endpoint() -> String {
    log_query::fetcher::DEFAULT_ENDPOINT.into()
}

fn default_page_size() -> u32 {
    log_query::fetcher::DEFAULT_PAGE_SIZE
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn parse_time(value: &str) -> common::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| common::Error::Timestamp {
            value: value.to_string(),
            source,
        })
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Some(token) = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
        {
            config.auth.access_token_override = Some(Secret::new(token.trim().to_string()));
        }

        Ok(config)
    }

    fn validate(&mut self) -> common::Result<()> {
        let query = &mut self.query;
        if query.resource_names.is_empty() {
            return Err(common::Error::invalid(
                "query.resource_names",
                "at least one resource name is required",
            ));
        }
        let start = parse_time(&query.start_time)?;
        let end = parse_time(&query.end_time)?;
        if end < start {
            return Err(common::Error::invalid(
                "query.end_time",
                format!("{end} is before start_time {start}"),
            ));
        }
        query.start = Some(start);
        query.end = Some(end);

        if query.segment_count == 0 {
            return Err(common::Error::invalid("query.segment_count", "must be greater than 0"));
        }
        if query.pool_size == 0 {
            return Err(common::Error::invalid("query.pool_size", "must be greater than 0"));
        }

        let retry = &self.retry;
        if retry.max_retry_count == 0 {
            return Err(common::Error::invalid("retry.max_retry_count", "must be greater than 0"));
        }
        if retry.max_wait_secs < retry.min_wait_secs {
            return Err(common::Error::invalid(
                "retry.max_wait_secs",
                "must not be less than min_wait_secs",
            ));
        }
        let retriable: HashSet<u16> = retry.retriable_status_codes.iter().copied().collect();
        let auth: HashSet<u16> = retry.auth_retriable_status_codes.iter().copied().collect();
        if let Some(code) = retriable.union(&auth).find(|c| !(400..=599).contains(*c)) {
            return Err(common::Error::invalid(
                "retry",
                format!("status code {code} is not an HTTP error status"),
            ));
        }
        if let Some(code) = retriable.intersection(&auth).next() {
            return Err(common::Error::invalid(
                "retry",
                format!("status code {code} is listed as both retriable and auth-retriable"),
            ));
        }

        if self.auth.resolvers.is_empty() {
            return Err(common::Error::invalid(
                "auth.resolvers",
                "at least one resolver is required",
            ));
        }

        let api = &self.logging_api;
        if !api.endpoint.starts_with("http://") && !api.endpoint.starts_with("https://") {
            return Err(common::Error::invalid(
                "logging_api.endpoint",
                format!("must start with http:// or https://, got: {}", api.endpoint),
            ));
        }
        if api.page_size == 0 {
            return Err(common::Error::invalid("logging_api.page_size", "must be greater than 0"));
        }
        if api.request_timeout_secs == 0 {
            return Err(common::Error::invalid(
                "logging_api.request_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("log-fetcher.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn minimal_toml() -> &'static str {
        r#"
[query]
resource_names = ["projects/my-project"]
filter = 'resource.type="k8s_cluster"'
start_time = "2024-05-01T00:00:00Z"
end_time = "2024-05-01T06:00:00Z"
"#
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log-fetcher.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(ACCESS_TOKEN_ENV) };
        let (_dir, path) = write_config(minimal_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.query.segment_count, 8);
        assert_eq!(config.query.pool_size, 4);
        assert_eq!(config.query.launch_stagger_secs, 3);
        assert_eq!(
            config.query.start.unwrap().to_rfc3339(),
            "2024-05-01T00:00:00+00:00"
        );
        assert_eq!(config.retry.max_retry_count, 5);
        assert_eq!(config.retry.auth_retriable_status_codes, vec![401, 403]);
        assert_eq!(config.auth.resolvers.len(), 3);
        assert_eq!(config.logging_api.endpoint, "https://logging.googleapis.com");
        assert_eq!(config.logging_api.page_size, 1000);
        assert!(config.metrics.listen_addr.is_none());
        assert!(config.auth.access_token_override.is_none());
    }

    #[test]
    fn full_config_round_trips_sections() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(ACCESS_TOKEN_ENV) };
        let (_dir, path) = write_config(
            r#"
[query]
resource_names = ["projects/a", "projects/b"]
start_time = "2024-05-01T00:00:00+02:00"
end_time = "2024-05-01T00:00:00+02:00"
segment_count = 2
pool_size = 1
launch_stagger_secs = 0
output = "/tmp/out.ndjson"
stream_unsorted = true

[retry]
min_wait_secs = 2
max_wait_secs = 4
max_retry_count = 3
retriable_status_codes = [429]

[auth]
quota_project = "billing"

[[auth.resolvers]]
kind = "command"
program = "print-token"

[[auth.resolvers]]
kind = "interactive"
client_id = "client.apps.googleusercontent.com"

[[auth.headers]]
name = "x-request-source"
value = "log-fetcher"

[logging_api]
endpoint = "http://127.0.0.1:9000"
page_size = 50

[metrics]
listen_addr = "127.0.0.1:9100"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.query.start, config.query.end);
        assert_eq!(config.query.output, Some(PathBuf::from("/tmp/out.ndjson")));
        assert!(config.query.stream_unsorted);

        let retry = config.retry.to_retry_config();
        assert_eq!(retry.min_wait, Duration::from_secs(2));
        assert_eq!(retry.max_retry_count, 3);
        assert!(retry.retriable_status_codes.contains(&429));
        assert!(!retry.retriable_status_codes.contains(&503));

        assert_eq!(
            config.auth.resolvers[0],
            ResolverConfig::Command {
                program: "print-token".into(),
                args: vec![]
            }
        );
        assert!(matches!(config.auth.resolvers[1], ResolverConfig::Interactive { .. }));
        assert_eq!(config.auth.quota_project.as_deref(), Some("billing"));
        assert_eq!(config.auth.headers[0].name, "x-request-source");
        assert_eq!(config.logging_api.page_size, 50);
        assert_eq!(
            config.metrics.listen_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn access_token_env_overrides_resolvers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (_dir, path) = write_config(minimal_toml());

        unsafe { set_env(ACCESS_TOKEN_ENV, "ya29.from-env\n") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(ACCESS_TOKEN_ENV) };

        assert_eq!(
            config.auth.access_token_override.as_ref().unwrap().expose(),
            "ya29.from-env"
        );
    }

    #[test]
    fn invalid_timestamp_names_the_value() {
        let (_dir, path) = write_config(
            r#"
[query]
resource_names = ["projects/p"]
start_time = "yesterday"
end_time = "2024-05-01T00:00:00Z"
"#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::Timestamp { ref value, .. } if value == "yesterday"));
    }

    #[test]
    fn rejects_inverted_time_range() {
        let (_dir, path) = write_config(
            r#"
[query]
resource_names = ["projects/p"]
start_time = "2024-05-02T00:00:00Z"
end_time = "2024-05-01T00:00:00Z"
"#,
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("query.end_time"), "got: {err}");
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ("resource_names = []", "query.resource_names"),
            ("segment_count = 0", "query.segment_count"),
            ("pool_size = 0", "query.pool_size"),
        ];
        for (line, field) in cases {
            let contents = format!(
                "[query]\nstart_time = \"2024-05-01T00:00:00Z\"\nend_time = \"2024-05-01T01:00:00Z\"\n{}{line}\n",
                if line.starts_with("resource_names") { "" } else { "resource_names = [\"projects/p\"]\n" }
            );
            let (_dir, path) = write_config(&contents);
            let err = Config::load(&path).unwrap_err().to_string();
            assert!(err.contains(field), "{line}: got {err}");
        }
    }

    #[test]
    fn rejects_bad_retry_settings() {
        let cases = [
            ("max_retry_count = 0", "retry.max_retry_count"),
            ("min_wait_secs = 10\nmax_wait_secs = 5", "retry.max_wait_secs"),
            ("retriable_status_codes = [200]", "not an HTTP error status"),
            ("retriable_status_codes = [401, 503]", "both retriable and auth-retriable"),
        ];
        for (retry, expected) in cases {
            let contents = format!("{}\n[retry]\n{retry}\n", minimal_toml());
            let (_dir, path) = write_config(&contents);
            let err = Config::load(&path).unwrap_err().to_string();
            assert!(err.contains(expected), "{retry}: got {err}");
        }
    }

    #[test]
    fn rejects_bad_endpoint_and_empty_resolvers() {
        let (_dir, path) = write_config(&format!(
            "{}\n[logging_api]\nendpoint = \"logging.googleapis.com\"\n",
            minimal_toml()
        ));
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("logging_api.endpoint"), "got: {err}");

        let (_dir, path) = write_config(&format!("{}\n[auth]\nresolvers = []\n", minimal_toml()));
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("auth.resolvers"), "got: {err}");
    }

    #[test]
    fn unknown_resolver_kind_is_parse_error() {
        let (_dir, path) = write_config(&format!(
            "{}\n[[auth.resolvers]]\nkind = \"carrier-pigeon\"\n",
            minimal_toml()
        ));
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/log-fetcher.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml")
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/should-lose.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("log-fetcher.toml"));
    }
}
