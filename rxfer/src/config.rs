//! Settings file
//!
//! Every section and key is optional; missing values keep the library defaults.
//!
//! ```toml
//! [resolver]
//! parallel_level = 4
//! local_file_patterns = ["**/*.zip"]
//!
//! [file_transfer]
//! user = "deployer"
//! password = "secret"
//!
//! [file_transfer.sftp]
//! port = 2222
//!
//! [health_checker.retry]
//! times = 10
//! delay_ms = 500
//! backoff = "linear"
//!
//! [[health_checker.checks]]
//! kind = "http"
//! name = "app"
//! url = "http://localhost:8080/health"
//! text = "UP"
//! ```

use anyhow::Context as _;
use common::{Backoff, Context, Error, Result, Retry};
use reqwest::Method;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use transfer::http::HttpOptions;
use transfer::resolve::LocalRepositoryResolver;
use transfer::sftp::SftpOptions;
use transfer::smb::SmbOptions;
use transfer::FileTransferManager;

use crate::health::{HealthChecker, HealthOptions, HttpExpectation};
use crate::resolver::ResolverOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub resolver: ResolverSettings,
    pub file_transfer: FileTransferSettings,
    pub health_checker: HealthCheckerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverSettings {
    pub parallel_level: Option<usize>,
    pub local_file_patterns: Option<Vec<String>>,
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileTransferSettings {
    pub user: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
    pub download_overwrite: bool,
    pub upload_overwrite: bool,
    pub http: HttpSettings,
    pub sftp: SftpSettings,
    pub smb: SmbSettings,
    pub resolve: ResolveSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub ignore_ssl: Option<bool>,
    pub proxy: Option<String>,
    pub preemptive_auth: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SftpSettings {
    pub enabled: Option<bool>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmbSettings {
    pub enabled: Option<bool>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveSettings {
    pub enabled: Option<bool>,
    /// Maven-layout repository roots, `~/.m2/repository` when unset
    pub repositories: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckerSettings {
    pub verbose: Option<bool>,
    pub wait_before_ms: Option<u64>,
    pub wait_after_ms: Option<u64>,
    pub host_timeout_ms: Option<u64>,
    pub retry: Option<RetrySettings>,
    pub assurance_retry: Option<RetrySettings>,
    pub checks: Vec<CheckSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    pub times: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_delay_ms() -> u64 {
    1000
}

impl RetrySettings {
    pub fn retry(&self) -> Retry {
        Retry::new(self.times, self.backoff, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CheckSettings {
    Http {
        name: String,
        url: String,
        method: Option<String>,
        #[serde(default)]
        statuses: Vec<u16>,
        text: Option<String>,
    },
    NoHttp {
        name: String,
        url: String,
    },
    Host {
        name: String,
        host: String,
        port: u16,
    },
    NoHost {
        name: String,
        host: String,
        port: u16,
    },
}

impl Settings {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read settings file {path:?}"))?;
        Self::parse(&text).with_context(|| format!("invalid settings file {path:?}"))
    }

    /// Settings from `path`, or defaults when no file is given
    pub fn load_optional(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        let defaults = ResolverOptions::default();
        let resolver = &self.resolver;
        ResolverOptions {
            download_dir: resolver.download_dir.clone().unwrap_or(defaults.download_dir),
            parallel_level: resolver.parallel_level.unwrap_or(defaults.parallel_level),
            local_file_patterns: resolver
                .local_file_patterns
                .clone()
                .unwrap_or(defaults.local_file_patterns),
        }
    }

    pub fn http_options(&self) -> HttpOptions {
        let http = &self.file_transfer.http;
        let defaults = HttpOptions::default();
        HttpOptions {
            enabled: http.enabled.unwrap_or(defaults.enabled),
            base_url: http.base_url.clone(),
            user: http.user.clone(),
            password: http.password.clone(),
            bearer_token: http.bearer_token.clone(),
            preemptive_auth: http.preemptive_auth.unwrap_or(defaults.preemptive_auth),
            ignore_ssl: http.ignore_ssl.unwrap_or(defaults.ignore_ssl),
            proxy: http.proxy.clone(),
            connect_timeout: http
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            timeout: http.timeout_ms.map(Duration::from_millis).or(defaults.timeout),
            response_checks: defaults.response_checks,
        }
    }

    pub fn sftp_options(&self) -> SftpOptions {
        let sftp = &self.file_transfer.sftp;
        let defaults = SftpOptions::default();
        SftpOptions {
            enabled: sftp.enabled.unwrap_or(defaults.enabled),
            user: sftp.user.clone(),
            password: sftp.password.clone(),
            port: sftp.port.unwrap_or(defaults.port),
            timeout: sftp
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn smb_options(&self) -> SmbOptions {
        let smb = &self.file_transfer.smb;
        SmbOptions {
            enabled: smb.enabled.unwrap_or(true),
            user: smb.user.clone(),
            password: smb.password.clone(),
            domain: smb.domain.clone(),
        }
    }

    pub fn manager(&self, context: Arc<Context>) -> Result<FileTransferManager> {
        let file_transfer = &self.file_transfer;
        let mut builder = FileTransferManager::builder(context.clone())
            .credentials(
                file_transfer.user.clone(),
                file_transfer.password.clone(),
                file_transfer.domain.clone(),
            )
            .http(self.http_options())
            .sftp(self.sftp_options())
            .smb(self.smb_options())
            .download_overwrite(file_transfer.download_overwrite)
            .upload_overwrite(file_transfer.upload_overwrite);
        if let Some(repositories) = &file_transfer.resolve.repositories {
            let roots = repositories
                .iter()
                .map(|root| context.resolve_path(root))
                .collect();
            builder = builder.dependency_resolver(Arc::new(LocalRepositoryResolver::new(roots)));
        }
        if let Some(enabled) = file_transfer.resolve.enabled {
            builder = builder.enabled(transfer::resolve::NAME, enabled);
        }
        builder.build()
    }

    pub fn health_options(&self) -> HealthOptions {
        let settings = &self.health_checker;
        let defaults = HealthOptions::default();
        HealthOptions {
            retry: settings
                .retry
                .as_ref()
                .map(RetrySettings::retry)
                .unwrap_or(defaults.retry),
            assurance_retry: settings
                .assurance_retry
                .as_ref()
                .map(RetrySettings::retry)
                .unwrap_or(defaults.assurance_retry),
            wait_before: settings
                .wait_before_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_before),
            wait_after: settings
                .wait_after_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_after),
            verbose: settings.verbose.unwrap_or(defaults.verbose),
            host_timeout: settings
                .host_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.host_timeout),
            ..defaults
        }
    }

    /// Checker with every configured check registered
    pub fn health_checker(&self, context: Arc<Context>) -> Result<HealthChecker> {
        let mut checker = HealthChecker::new(context, self.health_options())?;
        for check in &self.health_checker.checks {
            match check {
                CheckSettings::Http {
                    name,
                    url,
                    method,
                    statuses,
                    text,
                } => {
                    let mut expectation = HttpExpectation {
                        text: text.clone(),
                        ..HttpExpectation::default()
                    };
                    if !statuses.is_empty() {
                        expectation = expectation.with_statuses(statuses.iter().copied());
                    }
                    if let Some(method) = method {
                        let method = Method::from_bytes(method.to_uppercase().as_bytes())
                            .map_err(|error| {
                                Error::configuration(anyhow::anyhow!(
                                    "invalid HTTP method '{method}' of check '{name}': {error}"
                                ))
                            })?;
                        expectation = expectation.with_method(method);
                    }
                    checker.http(name.as_str(), url, expectation);
                }
                CheckSettings::NoHttp { name, url } => {
                    checker.no_http(name.as_str(), url);
                }
                CheckSettings::Host { name, host, port } => {
                    checker.host(name.as_str(), host, *port);
                }
                CheckSettings::NoHost { name, host, port } => {
                    checker.no_host(name.as_str(), host, *port);
                }
            }
        }
        Ok(checker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"
[resolver]
parallel_level = 1
local_file_patterns = ["**/*.tar.gz"]
download_dir = "cache"

[file_transfer]
user = "deployer"
password = "secret"
domain = "CORP"
download_overwrite = true

[file_transfer.http]
timeout_ms = 2500
preemptive_auth = false

[file_transfer.sftp]
user = "uploader"
port = 2222

[file_transfer.resolve]
enabled = false
repositories = ["repo"]

[health_checker]
verbose = false
wait_after_ms = 100

[health_checker.retry]
times = 4
backoff = "squared"

[health_checker.assurance_retry]
times = 0
delay_ms = 10

[[health_checker.checks]]
kind = "http"
name = "app"
url = "http://localhost:8080/health"
statuses = [200, 204]
method = "head"

[[health_checker.checks]]
kind = "no_host"
name = "old-db"
host = "localhost"
port = 5432
"#;

    #[test]
    fn parses_every_section() -> anyhow::Result<()> {
        let settings = Settings::parse(SETTINGS)?;
        let resolver = settings.resolver_options();
        assert_eq!(resolver.parallel_level, 1);
        assert_eq!(resolver.download_dir, PathBuf::from("cache"));
        assert_eq!(resolver.local_file_patterns, vec!["**/*.tar.gz"]);

        let http = settings.http_options();
        assert_eq!(http.timeout, Some(Duration::from_millis(2500)));
        assert!(!http.preemptive_auth);
        assert_eq!(http.user, None);
        let sftp = settings.sftp_options();
        assert_eq!(sftp.port, 2222);
        assert_eq!(sftp.user.as_deref(), Some("uploader"));

        let health = settings.health_options();
        assert_eq!(health.retry, Retry::new(4, Backoff::Squared, Duration::from_secs(1)));
        assert_eq!(health.assurance_retry.times(), 1);
        assert!(!health.verbose);
        assert_eq!(health.wait_after, Duration::from_millis(100));
        assert_eq!(
            settings.health_checker.checks[1],
            CheckSettings::NoHost {
                name: "old-db".to_string(),
                host: "localhost".to_string(),
                port: 5432,
            }
        );
        Ok(())
    }

    #[test]
    fn empty_settings_keep_defaults() -> anyhow::Result<()> {
        let settings = Settings::parse("")?;
        assert_eq!(settings.resolver_options().parallel_level, 3);
        assert_eq!(settings.health_options().retry.times(), 5);
        assert!(settings.health_options().verbose);
        assert_eq!(settings.sftp_options().timeout, Duration::from_secs(60));
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Settings::parse("[resolver]\nparalel_level = 2\n").unwrap_err();
        assert!(format!("{error:#}").contains("paralel_level"));
    }

    #[tokio::test]
    async fn builds_manager_and_checker() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let context = Context::builder().work_dir(tmp_dir.path()).build()?;
        let settings = Settings::parse(SETTINGS)?;
        let manager = settings.manager(context.clone())?;
        // resolve is disabled, so a bare notation falls through to the path handler
        assert_eq!(manager.handling("org.example:core:2.0")?.name(), "path");
        assert!(manager.named(transfer::resolve::NAME).is_err());

        let checker = settings.health_checker(context)?;
        let names: Vec<&str> = checker.checks().iter().map(|check| check.name()).collect();
        assert_eq!(names, vec!["app", "old-db"]);
        Ok(())
    }

    #[test]
    fn invalid_method_is_a_configuration_error() -> anyhow::Result<()> {
        let context = Context::builder().build()?;
        let settings = Settings::parse(
            "[[health_checker.checks]]\nkind = \"http\"\nname = \"app\"\nurl = \"http://localhost\"\nmethod = \"NOT A METHOD\"\n",
        )?;
        let error = settings.health_checker(context).unwrap_err();
        assert_eq!(error.kind(), common::ErrorKind::Configuration);
        Ok(())
    }
}
