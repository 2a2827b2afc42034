use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use snapflow_utils::error::ExtractionError;
use snapflow_utils::RawDocument;
use url::Url;

use super::Source;

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct HttpSourceBuilder {
    name: String,
    url: String,
    token: Option<String>,
    params: BTreeMap<String, String>,
    timeout: Duration,
}

impl HttpSourceBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: "extract".to_string(),
            url: url.into(),
            token: None,
            params: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn token<T: Into<String>>(mut self, token: Option<T>) -> Self {
        self.token = token.map(|t| t.into());
        self
    }

    /// Add a query parameter. Parameters are appended in key order.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpSource, ExtractionError> {
        let mut url = Url::parse(&self.url).map_err(|source| ExtractionError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;

        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
        }

        let client = ReqwestClient::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|source| ExtractionError::Transport {
                url: url.to_string(),
                source,
            })?;

        Ok(HttpSource {
            name: self.name,
            client,
            url,
            token: self.token,
        })
    }
}

/// Fetches a JSON document with a single `GET`.
#[derive(Debug)]
pub struct HttpSource {
    name: String,
    client: ReqwestClient,
    url: Url,
    token: Option<String>,
}

impl HttpSource {
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self) -> Result<RawDocument, ExtractionError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|source| ExtractionError::Transport {
                url: self.url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractionError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        let doc = resp
            .json::<RawDocument>()
            .await
            .map_err(|source| ExtractionError::Decode {
                url: self.url.to_string(),
                source,
            })?;

        tracing::debug!(source = %self.name, url = %self.url, "extracted document");
        Ok(doc)
    }
}
