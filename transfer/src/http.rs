//! HTTP(S) downloads and the shared HTTP client
//!
//! [`HttpClient`] wraps a `reqwest::Client` configured from [`HttpOptions`]; it is also used by the
//! URL handler and by HTTP health probes.

use async_trait::async_trait;
use common::patterns::Patterns;
use common::url::{is_url, join_url};
use common::{Context, Error, Result, TransferContext};
use futures::TryStreamExt;
use reqwest::{Method, Response, StatusCode, header::HeaderMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::{FileDownloader, FileTransfer, TransferKind};

pub const NAME: &str = "http";

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub enabled: bool,
    /// prefix for relative request paths
    pub base_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
    /// send basic credentials with the first request instead of waiting for a 401 challenge
    pub preemptive_auth: bool,
    pub ignore_ssl: bool,
    /// `scheme://host:port`
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Option<Duration>,
    /// treat non-2xx responses as errors
    pub response_checks: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            user: None,
            password: None,
            bearer_token: None,
            preemptive_auth: true,
            ignore_ssl: false,
            proxy: None,
            connect_timeout: Duration::from_secs(30),
            timeout: None,
            response_checks: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    options: HttpOptions,
}

impl HttpClient {
    pub fn new(options: HttpOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .danger_accept_invalid_certs(options.ignore_ssl);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|error| Error::configuration(anyhow::anyhow!("invalid HTTP proxy '{proxy}': {error}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(Error::configuration)?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Absolute URL for `url`, prefixing relative paths with the base URL
    pub fn url(&self, url: &str) -> String {
        match &self.options.base_url {
            Some(base_url) if !is_url(url) => {
                format!("{}/{}", base_url.trim_end_matches('/'), url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    fn basic_credentials(&self) -> Option<(&str, Option<&str>)> {
        self.options
            .user
            .as_deref()
            .filter(|user| !user.is_empty())
            .map(|user| (user, self.options.password.as_deref()))
    }

    async fn execute(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        basic: bool,
    ) -> reqwest::Result<Response> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers.clone());
        if let Some(token) = &self.options.bearer_token {
            request = request.bearer_auth(token);
        } else if basic && let Some((user, password)) = self.basic_credentials() {
            request = request.basic_auth(user, password);
        }
        request.send().await
    }

    /// Sends a request without checking the response status
    pub async fn send(&self, method: Method, url: &str, headers: HeaderMap) -> Result<Response> {
        let url = self.url(url);
        let preemptive = self.options.preemptive_auth;
        let response = self
            .execute(&method, &url, &headers, preemptive)
            .await
            .transfer_context(|| format!("HTTP request {method} '{url}' failed"))?;
        if response.status() == StatusCode::UNAUTHORIZED
            && !preemptive
            && self.options.bearer_token.is_none()
            && self.basic_credentials().is_some()
        {
            tracing::debug!("authentication challenge from '{}', retrying with credentials", url);
            return self
                .execute(&method, &url, &headers, true)
                .await
                .transfer_context(|| format!("HTTP request {method} '{url}' failed"));
        }
        Ok(response)
    }

    /// Sends a request; when response checks are enabled only 2xx statuses succeed
    pub async fn request(&self, method: Method, url: &str, headers: HeaderMap) -> Result<Response> {
        let response = self.send(method, url, headers).await?;
        if self.options.response_checks {
            check_status(&response)?;
        }
        Ok(response)
    }

    pub async fn get(&self, url: &str, headers: HeaderMap) -> Result<Response> {
        self.request(Method::GET, url, headers).await
    }
}

/// Server errors and throttling are worth retrying, client errors are not
pub fn check_status(response: &Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    Err(Error::transfer(anyhow::anyhow!(
        "Unexpected response status {} for URL '{}'",
        status,
        response.url()
    ))
    .with_retryable(retryable))
}

/// Streams the response body into `target`
pub(crate) async fn download_response(
    context: &Context,
    response: Response,
    target: &Path,
) -> std::io::Result<u64> {
    let size = response.content_length();
    let body = response.bytes_stream().map_err(std::io::Error::other);
    let reader = tokio_util::io::StreamReader::new(body);
    FileDownloader::new(context)
        .size(size)
        .download(reader, target)
        .await
}

pub struct HttpFileTransfer {
    context: Arc<Context>,
    client: HttpClient,
    protocols: Patterns,
}

impl HttpFileTransfer {
    pub fn new(context: Arc<Context>, options: HttpOptions) -> Result<Self> {
        Ok(Self {
            context,
            client: HttpClient::new(options)?,
            protocols: Patterns::wildcard(["http://*", "https://*"]).map_err(Error::configuration)?,
        })
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

#[async_trait]
impl FileTransfer for HttpFileTransfer {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> TransferKind {
        TransferKind::Http
    }

    fn protocols(&self) -> &Patterns {
        &self.protocols
    }

    fn enabled(&self) -> bool {
        self.client.options.enabled
    }

    #[instrument(skip(self))]
    async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        let url = join_url(dir_url, file_name);
        let context = || {
            format!(
                "Cannot download URL '{}' to file '{}' using HTTP(s)",
                url,
                target.display()
            )
        };
        let response = self
            .client
            .get(&url, HeaderMap::new())
            .await
            .map_err(|error| {
                let retryable = error.retryable;
                Error::transfer(error.cause.context(context())).with_retryable(retryable)
            })?;
        tracing::info!("Downloading: {} -> {:?}", url, target);
        download_response(&self.context, response, target)
            .await
            .transfer_context(context)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ProgressSettings, ProgressType, Retryable};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing_test::traced_test;

    fn response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Answers one connection per response, in order, and passes on each request head lowercased
    async fn serve(
        responses: Vec<String>,
    ) -> anyhow::Result<(String, tokio::sync::mpsc::UnboundedReceiver<String>)> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buffer = [0u8; 1024];
                while !head.windows(4).any(|window| window == b"\r\n\r\n") {
                    match stream.read(&mut buffer).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => head.extend_from_slice(&buffer[..read]),
                    }
                }
                let _ = sender.send(String::from_utf8_lossy(&head).to_lowercase());
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        Ok((base_url, receiver))
    }

    fn transfer_in(dir: &Path, options: HttpOptions) -> anyhow::Result<HttpFileTransfer> {
        let context = Context::builder()
            .work_dir(dir)
            .download_chunk_size(1024)
            .progress(Some(ProgressSettings {
                progress_type: ProgressType::TextUpdates,
                progress_delay: Some(Duration::ZERO),
            }))
            .build()?;
        Ok(HttpFileTransfer::new(context, options)?)
    }

    #[test]
    fn relative_urls_use_base_url() -> anyhow::Result<()> {
        let client = HttpClient::new(HttpOptions {
            base_url: Some("https://repo.example.com/content/".to_string()),
            ..Default::default()
        })?;
        assert_eq!(
            client.url("/releases/app.zip"),
            "https://repo.example.com/content/releases/app.zip"
        );
        assert_eq!(client.url("http://other/app.zip"), "http://other/app.zip");
        Ok(())
    }

    #[test]
    fn invalid_proxy_is_configuration_error() {
        let error = HttpClient::new(HttpOptions {
            proxy: Some("http://[bad".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(error.kind(), common::ErrorKind::Configuration);
    }

    #[test]
    fn matches_http_and_https_only() -> anyhow::Result<()> {
        let context = Context::builder().work_dir("/").build()?;
        let http = HttpFileTransfer::new(context, HttpOptions::default())?;
        assert!(http.handles("http://host/a.zip"));
        assert!(http.handles("https://host/a.zip"));
        assert!(!http.handles("sftp://host/a.zip"));
        assert!(http.parallelable());
        Ok(())
    }

    #[tokio::test]
    async fn connection_failure_is_retryable_transfer_error() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let context = Context::builder().work_dir(tmp_dir.path()).build()?;
        let http = HttpFileTransfer::new(
            context,
            HttpOptions {
                connect_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )?;
        // port 9 (discard) on loopback is closed on test machines
        let error = http
            .download_from("http://127.0.0.1:9/files", "app.zip", &tmp_dir.path().join("app.zip"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), common::ErrorKind::TransferFailure);
        assert!(error.is_retryable());
        assert!(
            error
                .to_string()
                .starts_with("Cannot download URL 'http://127.0.0.1:9/files/app.zip'"),
            "{error}"
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn streams_body_with_progress_and_bearer_token() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let body = "x".repeat(2048);
        let (base_url, mut requests) = serve(vec![response("200 OK", &body)]).await?;
        let http = transfer_in(
            tmp_dir.path(),
            HttpOptions {
                bearer_token: Some("t0ken".to_string()),
                user: Some("admin".to_string()),
                ..Default::default()
            },
        )?;
        let target = tmp_dir.path().join("app.zip");
        http.download_from(&format!("{base_url}/files"), "app.zip", &target)
            .await?;
        assert_eq!(tokio::fs::read_to_string(&target).await?, body);
        let head = requests.recv().await.unwrap();
        assert!(head.starts_with("get /files/app.zip http/1.1"), "{head}");
        assert!(head.contains("authorization: bearer t0ken"), "{head}");
        assert!(logs_contain("Downloading: app.zip |"));
        assert!(logs_contain("(100.00%"));
        Ok(())
    }

    #[tokio::test]
    async fn preemptive_basic_auth_goes_with_first_request() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let (base_url, mut requests) = serve(vec![response("200 OK", "payload")]).await?;
        let http = transfer_in(
            tmp_dir.path(),
            HttpOptions {
                user: Some("admin".to_string()),
                password: Some("s3cret".to_string()),
                ..Default::default()
            },
        )?;
        let target = tmp_dir.path().join("a.txt");
        http.download_from(&base_url, "a.txt", &target).await?;
        assert_eq!(tokio::fs::read_to_string(&target).await?, "payload");
        let head = requests.recv().await.unwrap();
        // base64 of "admin:s3cret"
        let expected = "authorization: basic YWRtaW46czNjcmV0".to_lowercase();
        assert!(head.contains(&expected), "{head}");
        Ok(())
    }

    #[tokio::test]
    async fn basic_auth_waits_for_challenge_unless_preemptive() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let (base_url, mut requests) = serve(vec![
            response("401 Unauthorized", ""),
            response("200 OK", "payload"),
        ])
        .await?;
        let http = transfer_in(
            tmp_dir.path(),
            HttpOptions {
                user: Some("admin".to_string()),
                password: Some("s3cret".to_string()),
                preemptive_auth: false,
                ..Default::default()
            },
        )?;
        let target = tmp_dir.path().join("a.txt");
        http.download_from(&base_url, "a.txt", &target).await?;
        assert_eq!(tokio::fs::read_to_string(&target).await?, "payload");
        let first = requests.recv().await.unwrap();
        assert!(!first.contains("authorization:"), "{first}");
        let second = requests.recv().await.unwrap();
        assert!(second.contains("authorization: basic "), "{second}");
        Ok(())
    }

    #[tokio::test]
    async fn error_statuses_decide_retryability() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        for (status, retryable) in [
            ("503 Service Unavailable", true),
            ("429 Too Many Requests", true),
            ("404 Not Found", false),
        ] {
            let (base_url, _requests) = serve(vec![response(status, "")]).await?;
            let http = transfer_in(tmp_dir.path(), HttpOptions::default())?;
            let target = tmp_dir.path().join("missing.zip");
            let error = http
                .download_from(&base_url, "missing.zip", &target)
                .await
                .unwrap_err();
            assert_eq!(error.kind(), common::ErrorKind::TransferFailure, "{status}");
            assert_eq!(error.is_retryable(), retryable, "{status}");
            assert!(error.to_string().contains(&status[..3]), "{error}");
            assert!(!target.exists());
        }
        Ok(())
    }
}
