// API HTTP client.
//
// Wraps `reqwest::Client` with the request discipline the rest of the
// workspace relies on: conditional GETs, indefinite retry of transient
// failures, manual redirect handling, and `Link` header extraction.

use reqwest::StatusCode;
use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH, LINK, LOCATION};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::Error;
use crate::request::{ApiRequest, ApiResponse, http_date, parse_links};

/// Redirect chains longer than this are treated as a server fault.
const MAX_REDIRECTS: u8 = 10;

/// GitHub error bodies carry a human-readable `message` field.
#[derive(serde::Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// HTTP client for the GitHub REST API.
///
/// Every request goes through [`get`](Self::get), which retries
/// connection failures and 5xx answers indefinitely (with a fixed
/// backoff) until the caller's cancellation token fires. Conditional
/// headers are attached when the request carries freshness tokens, and
/// a 304 is surfaced as an unchanged response rather than an error.
#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Ok(Self { http, config })
    }

    /// Root of the API this client talks to.
    pub fn api_url(&self) -> &Url {
        &self.config.api_url
    }

    /// Resolve an API path (e.g. `users/octocat`) against the API root.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.config.api_url.join(path.trim_start_matches('/'))?)
    }

    /// Issue a GET request and settle it into an [`ApiResponse`].
    ///
    /// Redirects are followed by hand so the conditional headers
    /// survive 301/302/307/308 hops and are dropped on 303 (the target
    /// is a different resource). Non-success statuses other than 304
    /// become typed errors.
    pub async fn get(
        &self,
        request: &ApiRequest,
        cancellation: &CancellationToken,
    ) -> Result<ApiResponse, Error> {
        let mut url = request.url.clone();
        let mut conditional = true;
        let mut hops = 0u8;

        loop {
            let response = self.send_with_retry(&url, request, conditional, cancellation).await?;
            let status = response.status();

            // 304 is in the 3xx class but is a final answer, not a hop.
            if status.is_redirection() && status != StatusCode::NOT_MODIFIED {
                hops += 1;
                if hops > MAX_REDIRECTS {
                    return Err(Error::Request {
                        status: status.as_u16(),
                        message: format!("redirect chain exceeded {MAX_REDIRECTS} hops"),
                        body: String::new(),
                    });
                }
                let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                else {
                    return Err(Error::Request {
                        status: status.as_u16(),
                        message: "redirect without a Location header".into(),
                        body: String::new(),
                    });
                };
                url = url.join(location)?;
                if status == StatusCode::SEE_OTHER {
                    conditional = false;
                }
                trace!(%url, hops, "following redirect");
                continue;
            }

            return Self::settle(request, response).await;
        }
    }

    /// Send one logical request, retrying transient failures forever.
    ///
    /// Connection errors, timeouts, and 5xx answers are retried after a
    /// fixed backoff; only cancellation breaks the loop. Anything else
    /// is returned to the caller as-is.
    async fn send_with_retry(
        &self,
        url: &Url,
        request: &ApiRequest,
        conditional: bool,
        cancellation: &CancellationToken,
    ) -> Result<reqwest::Response, Error> {
        loop {
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut builder = self.http.get(url.clone());
            if conditional {
                if let Some(etag) = &request.etag {
                    builder = builder.header(IF_NONE_MATCH, etag.as_str());
                }
                if let Some(last_modified) = request.last_modified {
                    builder = builder.header(IF_MODIFIED_SINCE, http_date(last_modified));
                }
            }

            debug!(%url, conditional, "GET");
            let outcome = tokio::select! {
                outcome = builder.send() => outcome,
                () = cancellation.cancelled() => return Err(Error::Cancelled),
            };

            match outcome {
                Ok(response) if response.status().is_server_error() => {
                    warn!(%url, status = %response.status(), "server error, retrying");
                }
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() || err.is_timeout() || err.is_request() => {
                    warn!(%url, error = %err, "connection failed, retrying");
                }
                Err(err) => return Err(Error::Transport(err)),
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.retry_backoff) => {}
                () = cancellation.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// Turn a final (non-redirect) HTTP response into an `ApiResponse`
    /// or a typed error.
    async fn settle(request: &ApiRequest, response: reqwest::Response) -> Result<ApiResponse, Error> {
        let status = response.status();
        let links = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(parse_links)
            .unwrap_or_default();

        if status == StatusCode::NOT_MODIFIED {
            trace!("not modified");
            return Ok(ApiResponse {
                changed: false,
                body: None,
                etag: request.etag.clone(),
                last_modified: request.last_modified,
                links,
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| chrono::DateTime::parse_from_rfc2822(value).ok())
            .map(|value| value.with_timezone(&chrono::Utc));

        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|parsed| parsed.message)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("unrecognized status")
                        .to_owned()
                });
            return Err(if status == StatusCode::UNAUTHORIZED {
                Error::Authorization {
                    status: status.as_u16(),
                    message,
                    body: text,
                }
            } else {
                Error::Request {
                    status: status.as_u16(),
                    message,
                    body: text,
                }
            });
        }

        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|err| {
                let preview = &text[..text.len().min(200)];
                Error::Deserialization {
                    message: format!("{err} (body preview: {preview:?})"),
                    body: text.clone(),
                }
            })?)
        };

        Ok(ApiResponse {
            changed: true,
            body,
            etag,
            last_modified,
            links,
        })
    }
}
