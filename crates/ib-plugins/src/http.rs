//! HTTP utilities for plugins.
//!
//! [`ApiHelper`] issues one request at a time, retries rate-limited and
//! server-error responses with a fixed back-off, maps status codes to
//! [`PluginError`]s, and redacts credentials from everything it logs.

use crate::redact::remove_sensitive_info;
use crate::traits::{PluginError, PluginResult};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Prefix of the User-Agent sent to every vendor.
pub const USER_AGENT_BASE: &str = "ioc-bridge";

/// Number of attempts for retryable responses.
pub const MAX_API_CALLS: u32 = 4;

/// Seconds to wait between retryable attempts.
pub const DEFAULT_WAIT_TIME: u64 = 60;

/// Fixed-interval retry policy for 429 and 5xx responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_API_CALLS,
            wait: Duration::from_secs(DEFAULT_WAIT_TIME),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            wait: Duration::ZERO,
        }
    }
}

/// Network settings supplied by the host for every plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Whether to verify TLS certificates.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    /// Proxy URL applied to all requests.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_verify_tls() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            verify_tls: default_verify_tls(),
            proxy: None,
            timeout_secs: default_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Platform-specific hints appended to validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessages {
    /// Hint for 400/401/403 (which credentials to verify).
    pub credentials_hint: String,
    /// Hint for 404 and unparseable responses (which URL to verify).
    pub url_hint: String,
}

impl StatusMessages {
    pub fn new(credentials_hint: impl Into<String>, url_hint: impl Into<String>) -> Self {
        Self {
            credentials_hint: credentials_hint.into(),
            url_hint: url_hint.into(),
        }
    }
}

/// Static configuration of an [`ApiHelper`].
#[derive(Debug, Clone)]
pub struct HelperConfig {
    pub platform_name: String,
    pub plugin_name: String,
    pub plugin_version: String,
    /// Host module name, e.g. "CTE".
    pub module: String,
    pub log_prefix: String,
    pub settings: HostSettings,
    pub messages: StatusMessages,
}

/// Outcome of classifying a response status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// 200, 201 or 202: parse the body.
    Success,
    /// 204: empty result.
    NoContent,
    /// Anything else, with the user-facing message.
    Error(String),
}

/// Returns true for statuses retried with back-off.
pub fn is_retryable(status: u16) -> bool {
    status == 429 || (500..=600).contains(&status)
}

/// Maps a status code to its outcome and message.
pub fn classify_status(
    status: u16,
    logger_msg: &str,
    is_validation: bool,
    messages: &StatusMessages,
) -> StatusOutcome {
    match status {
        200..=202 => return StatusOutcome::Success,
        204 => return StatusOutcome::NoContent,
        _ => {}
    }

    let message = if is_validation {
        match status {
            400 => format!(
                "Received exit code 400, Bad Request, {}",
                messages.credentials_hint
            ),
            401 => format!(
                "Received exit code 401, Unauthorized, {}",
                messages.credentials_hint
            ),
            403 => format!(
                "Received exit code 403, Forbidden, {}",
                messages.credentials_hint
            ),
            404 => format!(
                "Received exit code 404, Resource not found, {}",
                messages.url_hint
            ),
            400..=499 => format!(
                "Received exit code {}, HTTP client error, {}",
                status, messages.credentials_hint
            ),
            500..=600 => format!("Received exit code {}, HTTP Server Error.", status),
            _ => format!("Received exit code {}, HTTP Error.", status),
        }
    } else {
        let base = match status {
            400 => "Received exit code 400, HTTP client error".to_string(),
            401 => "Received exit code 401, Unauthorized access".to_string(),
            403 => "Received exit code 403, Forbidden".to_string(),
            404 => "Received exit code 404, Resource not found".to_string(),
            400..=499 => format!("Received exit code {}, HTTP client error", status),
            500..=600 => format!("Received exit code {}, HTTP Server Error", status),
            _ => format!("Received exit code {}, HTTP Error", status),
        };
        format!("{} while {}.", base, logger_msg)
    };

    StatusOutcome::Error(message)
}

/// Builds the User-Agent for a plugin.
pub fn user_agent(module: &str, plugin_name: &str, plugin_version: &str) -> String {
    format!(
        "{}-{}-{}-v{}",
        USER_AGENT_BASE,
        module.to_lowercase(),
        plugin_name.to_lowercase().replace(' ', "-"),
        plugin_version
    )
}

/// A request to be sent through [`ApiHelper`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    pub form: Option<Vec<(String, String)>>,
    pub headers: Vec<(String, String)>,
    /// What the request does, for log and error messages ("pulling indicators").
    pub logger_msg: String,
    /// Validation requests are not retried and get configuration hints.
    pub is_validation: bool,
    pub show_params: bool,
    pub show_data: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>, logger_msg: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            json: None,
            form: None,
            headers: Vec::new(),
            logger_msg: logger_msg.into(),
            is_validation: false,
            show_params: true,
            show_data: true,
        }
    }

    pub fn get(url: impl Into<String>, logger_msg: impl Into<String>) -> Self {
        Self::new(Method::GET, url, logger_msg)
    }

    pub fn post(url: impl Into<String>, logger_msg: impl Into<String>) -> Self {
        Self::new(Method::POST, url, logger_msg)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Replaces an existing header of the same name (case-insensitive).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn validation(mut self, is_validation: bool) -> Self {
        self.is_validation = is_validation;
        self
    }

    pub fn hide_params(mut self) -> Self {
        self.show_params = false;
        self
    }

    pub fn hide_data(mut self) -> Self {
        self.show_data = false;
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// One-line description of the request for debug logs.
    pub fn describe(&self) -> String {
        let mut msg = format!(
            "API Request for {}. Endpoint: {} {}",
            self.logger_msg, self.method, self.url
        );
        if self.show_params && !self.query.is_empty() {
            let params: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            msg.push_str(&format!(", params: {}", params.join("&")));
        }
        if self.show_data {
            if let Some(json) = &self.json {
                msg.push_str(&format!(", json: {}.", json));
            }
        }
        remove_sensitive_info(&msg)
    }
}

/// Status and body of a response, before error handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP helper shared by all plugins.
#[derive(Clone)]
pub struct ApiHelper {
    client: Client,
    config: HelperConfig,
    user_agent: String,
}

impl std::fmt::Debug for ApiHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiHelper")
            .field("platform", &self.config.platform_name)
            .field("log_prefix", &self.config.log_prefix)
            .finish()
    }
}

impl ApiHelper {
    /// Creates a helper from its configuration.
    pub fn new(config: HelperConfig) -> PluginResult<Self> {
        let settings = &config.settings;

        // TLS verification can only be turned off in debug builds
        let verify_tls = if !settings.verify_tls {
            #[cfg(debug_assertions)]
            {
                warn!(
                    platform = %config.platform_name,
                    "{}: TLS certificate verification DISABLED in development mode",
                    config.log_prefix
                );
                false
            }
            #[cfg(not(debug_assertions))]
            {
                warn!(
                    platform = %config.platform_name,
                    "{}: Request to disable TLS verification ignored in release builds",
                    config.log_prefix
                );
                true
            }
        } else {
            true
        };

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls);

        if let Some(proxy_url) = settings.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                PluginError::Configuration(format!(
                    "Invalid proxy configuration provided. Error: {}",
                    remove_sensitive_info(&e.to_string())
                ))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| PluginError::Configuration(e.to_string()))?;

        let user_agent = user_agent(
            &config.module,
            &config.plugin_name,
            &config.plugin_version,
        );

        Ok(Self {
            client,
            config,
            user_agent,
        })
    }

    /// Returns a copy of this helper logging under a different prefix.
    pub fn with_log_prefix(&self, log_prefix: impl Into<String>) -> Self {
        let mut helper = self.clone();
        helper.config.log_prefix = log_prefix.into();
        helper
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    pub fn log_prefix(&self) -> &str {
        &self.config.log_prefix
    }

    pub fn platform(&self) -> &str {
        &self.config.platform_name
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Sends a request and returns the parsed JSON body.
    pub async fn send(&self, request: &ApiRequest) -> PluginResult<serde_json::Value> {
        let raw = self.execute(request).await?;
        self.handle_response(&raw, &request.logger_msg, request.is_validation)
    }

    /// Sends a request, retrying 429 and 5xx responses, without status handling.
    pub async fn execute(&self, request: &ApiRequest) -> PluginResult<RawResponse> {
        let prefix = self.log_prefix();
        let retry = self.config.settings.retry;
        let attempts = retry.max_attempts.max(1);

        debug!("{}: {}", prefix, request.describe());

        for attempt in 0..attempts {
            let response = match self.build(request).send().await {
                Ok(response) => response,
                Err(e) => return Err(self.transport_error(&e, request)),
            };

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| self.transport_error(&e, request))?;

            debug!(
                "{}: Received API Response for {}. Status Code={}.",
                prefix, request.logger_msg, status
            );

            if is_retryable(status) && !request.is_validation {
                if attempt + 1 == attempts {
                    let message = format!(
                        "Received exit code {}, While {}. Max retries for rate limit \
                         handler exceeded hence returning status code {}.",
                        status, request.logger_msg, status
                    );
                    error!(
                        details = %format!("API response: {}", remove_sensitive_info(&body)),
                        "{}: {}",
                        prefix,
                        message
                    );
                    return Err(PluginError::RetriesExhausted { status, message });
                }

                error!(
                    details = %format!("API response: {}", remove_sensitive_info(&body)),
                    "{}: Received exit code {}, While {}. Retrying after {} seconds. \
                     {} retries remaining.",
                    prefix,
                    status,
                    request.logger_msg,
                    retry.wait.as_secs(),
                    attempts - 1 - attempt
                );
                sleep(retry.wait).await;
                continue;
            }

            return Ok(RawResponse { status, body });
        }

        Err(PluginError::Unexpected(format!(
            "Unexpected error occurred while {}.",
            request.logger_msg
        )))
    }

    /// Maps a response to its JSON body or the error for its status code.
    pub fn handle_response(
        &self,
        raw: &RawResponse,
        logger_msg: &str,
        is_validation: bool,
    ) -> PluginResult<serde_json::Value> {
        match classify_status(raw.status, logger_msg, is_validation, &self.config.messages) {
            StatusOutcome::Success => self.parse_response(raw, is_validation),
            StatusOutcome::NoContent => Ok(serde_json::json!({})),
            StatusOutcome::Error(message) => {
                let logged = if is_validation {
                    format!("Validation error occurred, {}", message)
                } else {
                    message.clone()
                };
                error!(
                    details = %format!("API response: {}", remove_sensitive_info(&raw.body)),
                    "{}: {}",
                    self.log_prefix(),
                    logged
                );
                Err(PluginError::Http {
                    status: Some(raw.status),
                    message,
                })
            }
        }
    }

    /// Parses a response body as JSON. An empty body yields `{}`.
    pub fn parse_response(
        &self,
        raw: &RawResponse,
        is_validation: bool,
    ) -> PluginResult<serde_json::Value> {
        if raw.body.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&raw.body).map_err(|e| {
            let message = format!("Invalid JSON response received from API. Error: {}", e);
            error!(
                details = %format!("API response: {}", remove_sensitive_info(&raw.body)),
                "{}: {}",
                self.log_prefix(),
                message
            );
            if is_validation {
                PluginError::InvalidResponse(format!(
                    "{} Check logs for more details.",
                    self.config.messages.url_hint
                ))
            } else {
                PluginError::InvalidResponse(message)
            }
        })
    }

    fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.has_header("User-Agent") {
            builder = builder.header("User-Agent", self.user_agent.as_str());
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }
        builder
    }

    fn transport_error(&self, e: &reqwest::Error, request: &ApiRequest) -> PluginError {
        let platform = self.platform();
        let msg = &request.logger_msg;
        let validation = request.is_validation;
        let proxied = self
            .config
            .settings
            .proxy
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());

        let error = if proxied && e.is_connect() {
            PluginError::Proxy(if validation {
                "Proxy error occurred. Verify the proxy configuration provided.".to_string()
            } else {
                format!(
                    "Proxy error occurred while {}. Verify the proxy configuration provided.",
                    msg
                )
            })
        } else if e.is_connect() || e.is_timeout() {
            PluginError::Connection(if validation {
                format!(
                    "Unable to establish connection with {} platform. \
                     Proxy server or {} server is not reachable.",
                    platform, platform
                )
            } else {
                format!(
                    "Unable to establish connection with {} platform while {}. \
                     Proxy server or {} server is not reachable.",
                    platform, msg, platform
                )
            })
        } else if e.is_request() || e.is_body() || e.is_decode() || e.is_redirect() {
            PluginError::Http {
                status: e.status().map(|s| s.as_u16()),
                message: if validation {
                    "HTTP error occurred. Verify configuration parameters provided.".to_string()
                } else {
                    format!("HTTP error occurred while {}.", msg)
                },
            }
        } else if validation {
            PluginError::Unexpected(format!(
                "Unexpected error while performing API call to {}. Check logs for more details.",
                platform
            ))
        } else {
            PluginError::Unexpected(format!("Unexpected error occurred while {}.", msg))
        };

        error!(
            details = %remove_sensitive_info(&format!("{:?}", e)),
            "{}: {} Error: {}",
            self.log_prefix(),
            error,
            remove_sensitive_info(&e.to_string())
        );
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> StatusMessages {
        StatusMessages::new(
            "Verify the Authentication Key provided in the configuration parameters.",
            "Verify the Base URL provided in the configuration parameters.",
        )
    }

    #[test]
    fn test_success_statuses() {
        for status in [200, 201, 202] {
            assert_eq!(
                classify_status(status, "pulling", false, &messages()),
                StatusOutcome::Success
            );
        }
        assert_eq!(
            classify_status(204, "pulling", true, &messages()),
            StatusOutcome::NoContent
        );
    }

    #[test]
    fn test_status_table() {
        let cases: &[(u16, &str)] = &[
            (400, "Received exit code 400, HTTP client error while pulling indicators."),
            (401, "Received exit code 401, Unauthorized access while pulling indicators."),
            (403, "Received exit code 403, Forbidden while pulling indicators."),
            (404, "Received exit code 404, Resource not found while pulling indicators."),
            (409, "Received exit code 409, HTTP client error while pulling indicators."),
            (503, "Received exit code 503, HTTP Server Error while pulling indicators."),
            (302, "Received exit code 302, HTTP Error while pulling indicators."),
        ];
        for (status, expected) in cases {
            assert_eq!(
                classify_status(*status, "pulling indicators", false, &messages()),
                StatusOutcome::Error(expected.to_string()),
                "status {}",
                status
            );
        }
    }

    #[test]
    fn test_validation_status_table() {
        let m = messages();
        let expect = |status: u16, text: String| {
            assert_eq!(
                classify_status(status, "validating", true, &m),
                StatusOutcome::Error(text)
            );
        };
        expect(
            400,
            format!("Received exit code 400, Bad Request, {}", m.credentials_hint),
        );
        expect(
            401,
            format!("Received exit code 401, Unauthorized, {}", m.credentials_hint),
        );
        expect(
            403,
            format!("Received exit code 403, Forbidden, {}", m.credentials_hint),
        );
        expect(
            404,
            format!("Received exit code 404, Resource not found, {}", m.url_hint),
        );
        expect(
            429,
            format!("Received exit code 429, HTTP client error, {}", m.credentials_hint),
        );
        expect(500, "Received exit code 500, HTTP Server Error.".to_string());
    }

    #[test]
    fn test_every_non_success_status_is_an_error() {
        for status in 100..=699u16 {
            let outcome = classify_status(status, "x", false, &messages());
            let expected_ok = matches!(status, 200..=202 | 204);
            assert_eq!(
                !matches!(outcome, StatusOutcome::Error(_)),
                expected_ok,
                "status {}",
                status
            );
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(429));
        assert!(is_retryable(500));
        assert!(is_retryable(503));
        assert!(is_retryable(600));
        assert!(!is_retryable(401));
        assert!(!is_retryable(404));
        assert!(!is_retryable(601));
    }

    #[test]
    fn test_user_agent() {
        assert_eq!(
            user_agent("CTE", "MISP Plugin", "3.1.0"),
            "ioc-bridge-cte-misp-plugin-v3.1.0"
        );
    }

    #[test]
    fn test_describe_redacts_and_hides() {
        let request = ApiRequest::post("https://fs.example.com/api/login", "getting auth token")
            .query("username", "admin")
            .query("password", "s3cret");
        let described = request.describe();
        assert!(described.contains("password=<Password>"));
        assert!(!described.contains("s3cret"));

        let hidden = request.hide_params().describe();
        assert!(!hidden.contains("username"));
    }

    #[test]
    fn test_set_header_replaces() {
        let mut request = ApiRequest::get("https://x.example.com", "x")
            .header("authorization", "old");
        request.set_header("Authorization", "new");
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "new".to_string())]
        );
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.wait, Duration::from_secs(60));
        assert_eq!(RetryPolicy::immediate(2).wait, Duration::ZERO);
    }
}
