use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{configuration::Config, error::Error};

use super::Sink;

/// Realtime-database style REST store: every path is addressable as
/// `{base}/{path}.json`.
#[derive(Debug, Clone)]
pub struct FirebaseSink {
    base: Url,
    auth: Option<String>,
    http: Client,
}

impl FirebaseSink {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            base: config.sink_url.clone(),
            auth: config.sink_auth.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let path = format!("{}.json", path.trim_matches('/'));
        let mut url = self.base.join(&path)?;
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    fn check(path: &str, response: Response) -> Result<Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::ConfigurationError(format!(
                "sink rejected credentials for {}",
                path
            )));
        }
        Err(Error::UpstreamError(format!(
            "sink returned {} for {}",
            status, path
        )))
    }
}

#[async_trait]
impl Sink for FirebaseSink {
    async fn get(&self, path: &str) -> Result<Option<Value>, Error> {
        let response = self.http.get(self.url(path)?).send().await?;
        let value = Self::check(path, response)?.json::<Value>().await?;
        match value {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), Error> {
        debug!("sink set {}", path);
        let response =
            self.http.put(self.url(path)?).json(&value).send().await?;
        Self::check(path, response)?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let response = self.http.delete(self.url(path)?).send().await?;
        Self::check(path, response)?;
        Ok(())
    }
}
