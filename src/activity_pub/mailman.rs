use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use axum::http::HeaderValue;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
const APPLICATION_LD_JSON: HeaderValue = HeaderValue::from_static(
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
);

/// Outbound HTTP seam, faked in tests.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    async fn fetch(&self, iri: &str) -> Result<Value>;
    /// Posts `body`; any status other than 200 and 204 is an error.
    async fn post(&self, inbox: &str, headers: HeaderMap, body: &str) -> Result<()>;
}

#[derive(Clone)]
pub(crate) struct Mailman {
    client: Client,
}

impl Mailman {
    pub(crate) fn new(timeout: Duration) -> Result<Mailman> {
        let client = Client::builder()
            .http1_only()
            .user_agent(APP_USER_AGENT)
            .gzip(true)
            .timeout(timeout)
            .build()
            .context("unable to build http client")?;
        Ok(Mailman { client })
    }
}

#[async_trait]
impl Transport for Mailman {
    async fn fetch(&self, iri: &str) -> Result<Value> {
        let response = self
            .client
            .get(iri)
            .header(header::ACCEPT, APPLICATION_LD_JSON)
            .send()
            .await?;
        if let Err(error) = response.error_for_status_ref() {
            bail!("fetching {iri} failed: {error}");
        }
        Ok(response.json().await?)
    }
    async fn post(&self, inbox: &str, headers: HeaderMap, body: &str) -> Result<()> {
        let response = self
            .client
            .post(inbox)
            .header(header::CONTENT_TYPE, APPLICATION_LD_JSON)
            .headers(headers)
            .body(body.to_string())
            .send()
            .await?;
        let code = response.status();
        if !is_delivered(code) {
            let text = response.text().await?;
            bail!("posting to {inbox} failed with error {code} {text}");
        }
        Ok(())
    }
}

fn is_delivered(status: StatusCode) -> bool {
    matches!(status, StatusCode::OK | StatusCode::NO_CONTENT)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{Result, anyhow, bail};
    use async_trait::async_trait;
    use axum::Router;
    use axum::routing::post;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::{Mailman, Transport};

    #[derive(Debug, Clone)]
    pub(crate) struct Posted {
        pub(crate) inbox: String,
        pub(crate) signed: bool,
        pub(crate) body: String,
    }

    /// In-memory transport: serves registered documents and records posts.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        documents: Mutex<BTreeMap<String, Value>>,
        failing: Mutex<BTreeSet<String>>,
        fetched: Mutex<Vec<String>>,
        posted: Mutex<Vec<Posted>>,
    }

    impl FakeTransport {
        pub(crate) fn serve(&self, iri: &str, document: Value) {
            self.documents
                .lock()
                .unwrap()
                .insert(iri.to_string(), document);
        }
        /// Posts to `inbox` answer with an error status from now on.
        pub(crate) fn fail(&self, inbox: &str) {
            self.failing.lock().unwrap().insert(inbox.to_string());
        }
        pub(crate) fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
        pub(crate) fn posted(&self) -> Vec<Posted> {
            self.posted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch(&self, iri: &str) -> Result<Value> {
            self.fetched.lock().unwrap().push(iri.to_string());
            self.documents
                .lock()
                .unwrap()
                .get(iri)
                .cloned()
                .ok_or_else(|| anyhow!("fetching {iri} failed: 404 Not Found"))
        }
        async fn post(&self, inbox: &str, headers: HeaderMap, body: &str) -> Result<()> {
            self.posted.lock().unwrap().push(Posted {
                inbox: inbox.to_string(),
                signed: headers.contains_key("Signature"),
                body: body.to_string(),
            });
            if self.failing.lock().unwrap().contains(inbox) {
                bail!("posting to {inbox} failed with error 503 Service Unavailable");
            }
            Ok(())
        }
    }

    #[test]
    fn only_ok_and_no_content_count_as_delivered() {
        assert!(super::is_delivered(StatusCode::OK));
        assert!(super::is_delivered(StatusCode::NO_CONTENT));
        for status in [
            StatusCode::CREATED,
            StatusCode::ACCEPTED,
            StatusCode::NOT_MODIFIED,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            assert!(!super::is_delivered(status), "{status}");
        }
    }

    #[tokio::test]
    async fn accepted_but_unprocessed_posts_fail() -> Result<()> {
        let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let app = Router::new()
            .route("/no-content", post(|| async { StatusCode::NO_CONTENT }))
            .route("/accepted", post(|| async { StatusCode::ACCEPTED }));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, app).await });

        let mailman = Mailman::new(Duration::from_secs(5))?;
        mailman
            .post(&format!("http://{addr}/no-content"), HeaderMap::new(), "{}")
            .await?;
        let error = mailman
            .post(&format!("http://{addr}/accepted"), HeaderMap::new(), "{}")
            .await
            .unwrap_err();
        assert!(error.to_string().contains("202"));
        Ok(())
    }
}
