//! HTTP client abstraction for talking to outbound peers.
//!
//! The poller and the outbound push only need two verbs, so the client is a
//! small trait. [`ReqwestHttpClient`] is the production implementation; tests
//! swap in scripted clients.

use core::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use thiserror::Error;
use url::Url;

/// A minimal async HTTP client for long-poll `GET`s and push `POST`s.
///
/// Implementations must reuse cookies across calls to the same target so
/// repeated polls stick to the same remote instance behind a load balancer.
pub trait HttpClient: Clone + Send + Sync + 'static {
    /// The error type for failed exchanges.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a `GET` request.
    fn get<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<HttpResponse, Self::Error>>;

    /// Send a `POST` request with a JSON body.
    fn post<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<HttpResponse, Self::Error>>;

    /// Whether `error` means the client gave up on its own timeout.
    ///
    /// Such failures are reported the same way as a missed deadline.
    fn is_timeout(_error: &Self::Error) -> bool {
        false
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body bytes.
    pub body: Vec<u8>,

    /// Response headers (lowercase keys).
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    /// Look up a response header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k == &lower)
            .map(|(_, v)| v.as_str())
    }
}

/// Error type for the reqwest-based HTTP client.
#[derive(Debug, Error)]
#[error("HTTP request failed: {0}")]
pub struct ReqwestHttpError(#[from] reqwest::Error);

impl ReqwestHttpError {
    /// Whether the request was aborted by its timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.0.is_timeout()
    }
}

/// A [`reqwest`]-backed implementation of [`HttpClient`] with a cookie store.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with its own cookie store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::builder()
                .cookie_store(true)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Wrap an existing [`reqwest::Client`].
    #[must_use]
    pub const fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    fn execute(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> BoxFuture<'static, Result<HttpResponse, ReqwestHttpError>> {
        async move {
            let resp = builder.send().await?;
            let status = resp.status().as_u16();

            let headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect();

            let body = resp.bytes().await?.to_vec();

            Ok(HttpResponse {
                status,
                body,
                headers,
            })
        }
        .boxed()
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    type Error = ReqwestHttpError;

    fn get<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<HttpResponse, Self::Error>> {
        let mut builder = self.inner.get(url.clone()).timeout(timeout);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        self.execute(builder)
    }

    fn post<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<HttpResponse, Self::Error>> {
        let mut builder = self
            .inner
            .post(url.clone())
            .timeout(timeout)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        self.execute(builder.body(body))
    }

    fn is_timeout(error: &Self::Error) -> bool {
        error.is_timeout()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted client for exercising the poller and push paths offline.

    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// Canned outcome for one request.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Respond(HttpResponse),
        /// Answer after a delay.
        After(Duration, HttpResponse),
        Fail,
        /// Fail the way a client-side timeout does.
        TimedOut,
        Hang,
    }

    impl Reply {
        pub(crate) fn status(status: u16) -> Self {
            Self::Respond(HttpResponse {
                status,
                ..HttpResponse::default()
            })
        }

        pub(crate) fn json(status: u16, body: Vec<u8>, remote_id: &str) -> Self {
            Self::Respond(HttpResponse {
                status,
                body,
                headers: vec![("uuid".into(), remote_id.into())],
            })
        }
    }

    #[derive(Debug, Error)]
    pub(crate) enum ScriptedError {
        #[error("connection refused")]
        Refused,
        #[error("operation timed out")]
        TimedOut,
    }

    /// One recorded request.
    #[derive(Debug, Clone)]
    pub(crate) struct Seen {
        pub(crate) method: &'static str,
        pub(crate) headers: Vec<(String, String)>,
        pub(crate) body: Vec<u8>,
    }

    /// Replays queued replies; once exhausted, every request fails.
    ///
    /// `Reply::Hang` never completes, leaving the caller to its timeout.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ScriptedClient {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl ScriptedClient {
        pub(crate) fn with_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into_iter().collect())),
                seen: Arc::default(),
            }
        }

        pub(crate) fn seen(&self) -> Vec<Seen> {
            self.seen.lock().expect("seen lock").clone()
        }

        fn next(
            &self,
            method: &'static str,
            headers: &[(String, String)],
            body: Vec<u8>,
        ) -> BoxFuture<'static, Result<HttpResponse, ScriptedError>> {
            self.seen.lock().expect("seen lock").push(Seen {
                method,
                headers: headers.to_vec(),
                body,
            });
            match self.replies.lock().expect("replies lock").pop_front() {
                Some(Reply::Respond(resp)) => futures::future::ready(Ok(resp)).boxed(),
                Some(Reply::After(delay, resp)) => async move {
                    tokio::time::sleep(delay).await;
                    Ok(resp)
                }
                .boxed(),
                Some(Reply::TimedOut) => {
                    futures::future::ready(Err(ScriptedError::TimedOut)).boxed()
                }
                Some(Reply::Hang) => futures::future::pending().boxed(),
                Some(Reply::Fail) | None => {
                    futures::future::ready(Err(ScriptedError::Refused)).boxed()
                }
            }
        }
    }

    impl HttpClient for ScriptedClient {
        type Error = ScriptedError;

        fn get<'a>(
            &'a self,
            _url: &'a Url,
            headers: &'a [(String, String)],
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<HttpResponse, Self::Error>> {
            self.next("GET", headers, Vec::new())
        }

        fn post<'a>(
            &'a self,
            _url: &'a Url,
            headers: &'a [(String, String)],
            body: Vec<u8>,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<HttpResponse, Self::Error>> {
            self.next("POST", headers, body)
        }

        fn is_timeout(error: &Self::Error) -> bool {
            matches!(error, ScriptedError::TimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = HttpResponse {
            status: 200,
            body: Vec::new(),
            headers: vec![("uuid".into(), "server-1".into())],
        };

        assert_eq!(resp.header("UUID"), Some("server-1"));
        assert_eq!(resp.header("x-missing"), None);
    }
}
