use std::{fmt::Debug, future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::{
    configuration::Config, error::Error, helpers::formatter,
    types::GraphResponse,
};

/// Executes `$`-parameterized queries against one upstream index.
#[async_trait]
pub trait SourceClient: Send + Sync + Debug {
    async fn query(
        &self,
        query: &str,
        params: &[(&str, String)],
    ) -> Result<Value, Error>;
}

#[derive(Debug, Clone)]
pub struct Subgraph {
    pub url: Url,
    http: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl Subgraph {
    pub fn new(config: &Config, subgraph: &str) -> Result<Self, Error> {
        let url = config.graph_host.join(subgraph)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            url,
            http,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    async fn send(&self, body: &Value) -> Result<Value, Error> {
        let response = self
            .http
            .post(self.url.clone())
            .json(body)
            .send()
            .await?
            .json::<GraphResponse>()
            .await?;

        read_response(response)
    }
}

#[async_trait]
impl SourceClient for Subgraph {
    async fn query(
        &self,
        query: &str,
        params: &[(&str, String)],
    ) -> Result<Value, Error> {
        let body = json!({ "query": formatter(query.to_owned(), params) });
        let body = &body;

        with_retries(self.url.as_str(), self.max_retries, self.retry_delay, move || {
            self.send(body)
        })
        .await
    }
}

/// Calls `send` up to `max_retries` times while it fails with a transient
/// error. A transport error still failing on the last attempt is reported
/// as `UpstreamError`.
pub async fn with_retries<F, Fut>(
    target: &str,
    max_retries: u32,
    retry_delay: Duration,
    mut send: F,
) -> Result<Value, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, Error>>,
{
    let mut attempt = 1;

    loop {
        match send().await {
            Ok(data) => return Ok(data),
            Err(e) if is_transient(&e) && attempt < max_retries => {
                warn!("{}: attempt {}/{} failed: {}", target, attempt, max_retries, e);
                attempt += 1;
                sleep(retry_delay).await;
            },
            Err(Error::ReqwestError(e)) => {
                return Err(Error::UpstreamError(format!("{}: {}", target, e)));
            },
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(err: &Error) -> bool {
    matches!(err, Error::UpstreamError(_) | Error::ReqwestError(_))
}

/// Classifies a decoded response. Errors that name a known indexer
/// condition win over a partial `data` payload.
pub fn read_response(response: GraphResponse) -> Result<Value, Error> {
    if let Some(errors) = &response.errors {
        for e in errors {
            let message = &e.message;
            if message.contains("only indexed up to")
                || message.contains("not yet available")
            {
                return Err(Error::IndexingLag(message.to_owned()));
            }
            if message.contains("Null value resolved for non-null field") {
                return Err(Error::MissingEntity(message.to_owned()));
            }
        }
    }

    match response.data {
        Some(Value::Null) | None => {
            let message = response
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<String>>()
                .join("; ");
            Err(Error::UpstreamError(if message.is_empty() {
                String::from("response without data")
            } else {
                message
            }))
        },
        Some(data) => Ok(data),
    }
}
