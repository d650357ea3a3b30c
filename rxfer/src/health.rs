//! Parallel health checking with bounded retries and assurance rounds
//!
//! A [`HealthChecker`] owns named probes. Every attempt runs all of them at once on the worker
//! pool. Checking passes once `assurance_retry.times()` rounds each end green; within a round a
//! red attempt is retried (with a visible countdown) until `retry.times()` attempts are used up.
//! Every round gets the full retry budget.
//!
//! ```text
//! Idle -> WaitingBefore -> Probing(1) -> Assuring(round 1) -> Probing(1) -> ... -> WaitingAfter -> Done
//!                              |    ^
//!                              +----+ red attempt, retried up to retry.times within the round
//! ```

use common::progress::percent;
use common::{Context, Error, Result, Retry};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Method;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::instrument;
use transfer::http::{HttpClient, HttpOptions};

pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(1);

type CheckAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Option<String>>> + Send + Sync>;

/// Named probe; the action returns optional details on success
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    action: CheckAction,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl HealthCheck {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move || action().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn perform(&self) -> HealthStatus {
        match (self.action)().await {
            Ok(details) => HealthStatus {
                check: self.name.clone(),
                succeed: true,
                details,
            },
            Err(error) => HealthStatus {
                check: self.name.clone(),
                succeed: false,
                details: Some(format!("{error:#}")),
            },
        }
    }
}

/// Outcome of one probe in the latest round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub check: String,
    pub succeed: bool,
    /// success details or the failure message
    pub details: Option<String>,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.succeed { '+' } else { '-' };
        let details = match (&self.details, self.succeed) {
            (Some(details), _) => details.as_str(),
            (None, true) => "Succeed",
            (None, false) => "Failed",
        };
        write!(f, "[{}] {} | {}", sign, self.check, details.trim())
    }
}

/// Statuses failed-first then by check name, one per line
pub fn render_statuses(statuses: &[HealthStatus]) -> String {
    let mut sorted: Vec<&HealthStatus> = statuses.iter().collect();
    sorted.sort_by(|a, b| (a.succeed, &a.check).cmp(&(b.succeed, &b.check)));
    sorted
        .iter()
        .map(|status| status.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn success_ratio(statuses: &[HealthStatus]) -> String {
    let passed = statuses.iter().filter(|status| status.succeed).count() as u64;
    let all = statuses.len() as u64;
    format!("{}/{} ({})", passed, all, percent(passed, all))
}

pub fn failure_report(statuses: &[HealthStatus]) -> String {
    format!(
        "Health checking failed. Success ratio: {}:\n{}",
        success_ratio(statuses),
        render_statuses(statuses)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Idle,
    WaitingBefore,
    Probing { attempt: u32 },
    /// round `round` passed, more green rounds are needed
    Assuring { attempt: u32, round: u32 },
    WaitingAfter,
    Done { succeed: bool },
}

#[derive(Debug, Clone)]
pub struct HealthOptions {
    pub retry: Retry,
    pub assurance_retry: Retry,
    pub wait_before: Duration,
    pub wait_after: Duration,
    /// fail with the report instead of logging it
    pub verbose: bool,
    /// client used by HTTP probes
    pub http: HttpOptions,
    pub host_timeout: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            retry: Retry::squared(5, Duration::from_secs(1)),
            assurance_retry: Retry::constant(3, Duration::from_secs(1)),
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
            verbose: true,
            http: HttpOptions {
                connect_timeout: Duration::from_secs(5),
                response_checks: false,
                ..HttpOptions::default()
            },
            host_timeout: DEFAULT_HOST_TIMEOUT,
        }
    }
}

/// What an HTTP probe expects from the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpExpectation {
    pub method: Method,
    /// any of these; empty accepts every status
    pub statuses: Vec<u16>,
    pub text: Option<String>,
}

impl Default for HttpExpectation {
    fn default() -> Self {
        Self {
            method: Method::GET,
            statuses: vec![200],
            text: None,
        }
    }
}

impl HttpExpectation {
    pub fn status(status: u16) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    /// Status 200 with `text` somewhere in the body
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

async fn http_probe(
    client: Arc<HttpClient>,
    url: String,
    expectation: HttpExpectation,
) -> anyhow::Result<Option<String>> {
    let method = expectation.method.clone();
    let response = client.send(method.clone(), &url, HeaderMap::new()).await?;
    let status = response.status();
    if !expectation.statuses.is_empty() && !expectation.statuses.contains(&status.as_u16()) {
        anyhow::bail!(
            "Unexpected response status {} for URL '{}', expected {:?}",
            status,
            url,
            expectation.statuses
        );
    }
    if let Some(text) = &expectation.text {
        let body = response.text().await?;
        if !body.contains(text.as_str()) {
            anyhow::bail!("Response of URL '{}' does not contain text '{}'", url, text);
        }
    }
    Ok(Some(format!("{method} {url} -> {status}")))
}

async fn reachable(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

pub struct HealthChecker {
    context: Arc<Context>,
    options: HealthOptions,
    http: Arc<HttpClient>,
    checks: Vec<HealthCheck>,
    state: Mutex<HealthState>,
    statuses: Mutex<Vec<HealthStatus>>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("options", &self.options)
            .field("checks", &self.checks)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    pub fn new(context: Arc<Context>, options: HealthOptions) -> Result<Self> {
        let http = Arc::new(HttpClient::new(options.http.clone())?);
        Ok(Self {
            context,
            options,
            http,
            checks: vec![],
            state: Mutex::new(HealthState::Idle),
            statuses: Mutex::new(vec![]),
        })
    }

    pub fn options(&self) -> &HealthOptions {
        &self.options
    }

    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    pub fn state(&self) -> HealthState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HealthState) {
        tracing::debug!("health checker state: {:?}", state);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Statuses of the latest round, in registration order
    pub fn all(&self) -> Vec<HealthStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn passed(&self) -> Vec<HealthStatus> {
        self.all().into_iter().filter(|status| status.succeed).collect()
    }

    pub fn failed(&self) -> Vec<HealthStatus> {
        self.all().into_iter().filter(|status| !status.succeed).collect()
    }

    pub fn check<F, Fut>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        self.checks.push(HealthCheck::new(name, action));
        self
    }

    /// Passes when the response matches `expectation`
    pub fn http(&mut self, name: impl Into<String>, url: &str, expectation: HttpExpectation) -> &mut Self {
        let client = self.http.clone();
        let url = url.to_string();
        self.check(name, move || {
            http_probe(client.clone(), url.clone(), expectation.clone())
        })
    }

    /// Passes when nothing answers at `url`
    pub fn no_http(&mut self, name: impl Into<String>, url: &str) -> &mut Self {
        let client = self.http.clone();
        let url = url.to_string();
        self.check(name, move || {
            let client = client.clone();
            let url = url.clone();
            async move {
                match client.send(Method::GET, &url, HeaderMap::new()).await {
                    Ok(_) => anyhow::bail!("HTTP GET '{}' is available", url),
                    Err(_) => Ok(None),
                }
            }
        })
    }

    pub fn host(&mut self, name: impl Into<String>, host: &str, port: u16) -> &mut Self {
        let host = host.to_string();
        let timeout = self.options.host_timeout;
        self.check(name, move || {
            let host = host.clone();
            async move {
                if !reachable(&host, port, timeout).await {
                    anyhow::bail!("Host '{}' at port {} is not reachable", host, port);
                }
                Ok(None)
            }
        })
    }

    pub fn no_host(&mut self, name: impl Into<String>, host: &str, port: u16) -> &mut Self {
        let host = host.to_string();
        let timeout = self.options.host_timeout;
        self.check(name, move || {
            let host = host.clone();
            async move {
                if reachable(&host, port, timeout).await {
                    anyhow::bail!("Host '{}' at port {} is reachable", host, port);
                }
                Ok(None)
            }
        })
    }

    /// One parallel round over all checks; fails unless every check passed
    async fn probe(&self, attempt: u32, round: u32) -> Result<()> {
        self.set_state(HealthState::Probing { attempt });
        let statuses = self
            .context
            .pool
            .map(self.checks.clone(), |check| async move {
                Ok::<_, Error>(check.perform().await)
            })
            .await?;
        let failed = statuses.iter().filter(|status| !status.succeed).count();
        if failed > 0 {
            tracing::info!(
                "Attempt {}/{}, {} failed:\n{}",
                attempt,
                self.options.retry.times(),
                failed,
                render_statuses(&statuses)
            );
        }
        *self.statuses.lock().unwrap_or_else(PoisonError::into_inner) = statuses;
        if failed > 0 {
            return Err(Error::health(format!(
                "{} of {} health check(s) failed",
                failed,
                self.checks.len()
            )));
        }
        if round < self.options.assurance_retry.times() {
            self.set_state(HealthState::Assuring { attempt, round });
        }
        tracing::info!(
            "Health checking passed ({}/{})",
            round,
            self.options.assurance_retry.times()
        );
        Ok(())
    }

    /// Runs the checks until they pass or attempts run out
    ///
    /// Returns the statuses of the latest round. A final failure is an error when `verbose` is
    /// set and only logged otherwise.
    #[instrument(skip(self), fields(checks = self.checks.len()))]
    pub async fn start(&self) -> Result<Vec<HealthStatus>> {
        let reporter = &self.context.reporter;
        self.set_state(HealthState::WaitingBefore);
        reporter
            .countdown("Health checking (wait before)", self.options.wait_before)
            .await;
        let outcome = self
            .options
            .assurance_retry
            .with_sleep_till_end(move |round| {
                self.options
                    .retry
                    .with_countdown(reporter, "health checking", move |attempt| {
                        self.probe(attempt, round)
                    })
            })
            .await;
        let all = self.all();
        let succeed = match outcome {
            Ok(_) => true,
            Err(error) if error.kind() == common::ErrorKind::HealthCheckFailure => {
                let report = failure_report(&all);
                if self.options.verbose {
                    self.set_state(HealthState::Done { succeed: false });
                    return Err(Error::health(report));
                }
                tracing::error!("{}", report);
                false
            }
            Err(error) => {
                self.set_state(HealthState::Done { succeed: false });
                return Err(error);
            }
        };
        self.set_state(HealthState::WaitingAfter);
        reporter
            .countdown("Health checking (wait after)", self.options.wait_after)
            .await;
        if succeed {
            tracing::info!("Health checking succeed.\n{}", render_statuses(&all));
        }
        self.set_state(HealthState::Done { succeed });
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing_test::traced_test;

    fn checker(options: HealthOptions) -> anyhow::Result<HealthChecker> {
        let context = Context::builder().pool_size(4).build()?;
        Ok(HealthChecker::new(context, options)?)
    }

    fn single_round(verbose: bool) -> HealthOptions {
        HealthOptions {
            retry: Retry::none(),
            assurance_retry: Retry::none(),
            verbose,
            ..HealthOptions::default()
        }
    }

    fn passing_after(fails: usize) -> impl Fn() -> BoxFuture<'static, anyhow::Result<Option<String>>> {
        let calls = Arc::new(AtomicUsize::new(0));
        move || {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < fails {
                    anyhow::bail!("not ready ({})", call + 1);
                }
                Ok(None)
            }
            .boxed()
        }
    }

    /// Answers every connection with `response` until the test ends
    async fn http_server(response: &'static str) -> anyhow::Result<u16> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buffer = [0u8; 1024];
                    let _ = stream.read(&mut buffer).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        Ok(port)
    }

    async fn closed_port() -> anyhow::Result<u16> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        Ok(listener.local_addr()?.port())
    }

    #[tokio::test]
    #[traced_test]
    async fn report_lists_failures_first() -> anyhow::Result<()> {
        let mut checker = checker(single_round(false))?;
        checker
            .check("A", || async { Ok(None) })
            .check("B", || async { anyhow::bail!("x") });
        let statuses = checker.start().await?;
        assert_eq!(statuses.len(), 2);
        assert_eq!(checker.passed().len(), 1);
        assert_eq!(checker.passed()[0].check, "A");
        assert_eq!(checker.failed()[0].check, "B");
        assert_eq!(checker.state(), HealthState::Done { succeed: false });

        let report = render_statuses(&statuses);
        assert_eq!(report, "[-] B | x\n[+] A | Succeed");
        assert!(logs_contain("Health checking failed. Success ratio: 1/2 (50.00%)"));
        Ok(())
    }

    #[tokio::test]
    async fn verbose_failure_is_an_error() -> anyhow::Result<()> {
        let mut checker = checker(single_round(true))?;
        checker
            .check("web", || async { Ok(Some("200 OK".to_string())) })
            .check("db", || async { anyhow::bail!("connection refused") })
            .check("cache", || async { anyhow::bail!("timeout") });
        let error = checker.start().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HealthCheckFailure);
        assert_eq!(
            error.to_string(),
            "Health checking failed. Success ratio: 1/3 (33.33%):\n\
             [-] cache | timeout\n\
             [-] db | connection refused\n\
             [+] web | 200 OK"
        );
        Ok(())
    }

    #[tokio::test]
    async fn retries_until_assurance_rounds_pass() -> anyhow::Result<()> {
        let mut checker = checker(HealthOptions {
            retry: Retry::constant(5, Duration::ZERO),
            assurance_retry: Retry::constant(3, Duration::ZERO),
            ..HealthOptions::default()
        })?;
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let probe = passing_after(2);
        checker.check("service", move || {
            counted.fetch_add(1, Ordering::SeqCst);
            probe()
        });
        let statuses = checker.start().await?;
        assert!(statuses.iter().all(|status| status.succeed));
        // the first round needs three attempts, the other two pass at once
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(checker.state(), HealthState::Done { succeed: true });
        Ok(())
    }

    /// Passes or fails call by call; calls past the end pass
    fn answering(
        outcomes: &'static [bool],
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<Option<String>>> {
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if outcomes.get(call).copied().unwrap_or(true) {
                    return Ok(None);
                }
                anyhow::bail!("blip {}", call + 1)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn flapping_check_is_retried_within_its_round() -> anyhow::Result<()> {
        let mut checker = checker(HealthOptions {
            retry: Retry::constant(3, Duration::ZERO),
            assurance_retry: Retry::constant(3, Duration::ZERO),
            ..HealthOptions::default()
        })?;
        let calls = Arc::new(AtomicUsize::new(0));
        checker.check("flaky", answering(&[true, false, true, true], calls.clone()));
        checker.start().await?;
        // green, then red and green in the second round, then green
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(checker.state(), HealthState::Done { succeed: true });
        Ok(())
    }

    #[tokio::test]
    async fn every_assurance_round_gets_full_retry_budget() -> anyhow::Result<()> {
        let mut checker = checker(HealthOptions {
            retry: Retry::constant(2, Duration::ZERO),
            assurance_retry: Retry::constant(2, Duration::ZERO),
            ..HealthOptions::default()
        })?;
        let calls = Arc::new(AtomicUsize::new(0));
        checker.check("svc", answering(&[false, true, false, true], calls.clone()));
        let statuses = checker.start().await?;
        assert!(statuses.iter().all(|status| status.succeed));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[tokio::test]
    async fn attempts_are_bounded() -> anyhow::Result<()> {
        let mut checker = checker(HealthOptions {
            retry: Retry::constant(3, Duration::ZERO),
            assurance_retry: Retry::constant(2, Duration::ZERO),
            ..HealthOptions::default()
        })?;
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        checker.check("down", move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("refused") }
        });
        let error = checker.start().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HealthCheckFailure);
        // both rounds use up their three attempts
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        Ok(())
    }

    #[tokio::test]
    async fn host_probes() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let open = listener.local_addr()?.port();
        let closed = closed_port().await?;
        let mut checker = checker(single_round(false))?;
        checker
            .host("open", "127.0.0.1", open)
            .no_host("open-absent", "127.0.0.1", open)
            .host("closed", "127.0.0.1", closed)
            .no_host("closed-absent", "127.0.0.1", closed);
        checker.start().await?;
        let failed: Vec<String> = checker.failed().into_iter().map(|status| status.to_string()).collect();
        assert_eq!(
            failed,
            vec![
                format!("[-] open-absent | Host '127.0.0.1' at port {open} is reachable"),
                format!("[-] closed | Host '127.0.0.1' at port {closed} is not reachable"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn http_probes() -> anyhow::Result<()> {
        let port = http_server("HTTP/1.1 200 OK\r\nContent-Length: 13\r\nConnection: close\r\n\r\nservice ready").await?;
        let closed = closed_port().await?;
        let url = format!("http://127.0.0.1:{port}/health");
        let mut checker = checker(single_round(false))?;
        checker
            .http("status", &url, HttpExpectation::default())
            .http("text", &url, HttpExpectation::text("ready"))
            .http("missing-text", &url, HttpExpectation::text("degraded"))
            .http("not-found", &url, HttpExpectation::status(404))
            .no_http("up", &url)
            .no_http("down", &format!("http://127.0.0.1:{closed}/health"));
        checker.start().await?;
        let mut passed: Vec<String> = checker.passed().into_iter().map(|status| status.check).collect();
        passed.sort();
        assert_eq!(passed, vec!["down", "status", "text"]);
        let status = checker
            .passed()
            .into_iter()
            .find(|status| status.check == "status")
            .and_then(|status| status.details);
        assert_eq!(status, Some(format!("GET {url} -> 200 OK")));
        let failed = render_statuses(&checker.failed());
        assert!(failed.contains("[-] missing-text | Response of URL"));
        assert!(failed.contains("[-] up | HTTP GET"));
        Ok(())
    }
}
