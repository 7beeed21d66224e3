//! REST transport over `reqwest`.

use super::{Transport, TransportRequest};
use crate::config::HttpConfig;
use crate::{error::Result, Error, Method};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

/// Maps requests onto a REST collection API:
///
/// | method | target     | HTTP                          |
/// |--------|------------|-------------------------------|
/// | read   | collection | `GET {base}/{table}`          |
/// | read   | record     | `GET {base}/{table}/{id}`     |
/// | create | collection | `POST {base}/{table}`         |
/// | update | record     | `PUT {base}/{table}/{id}`     |
/// | delete | record     | `DELETE {base}/{table}/{id}`  |
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| invalid_base(&config, e))?;
        if base.cannot_be_a_base() {
            return Err(invalid_base(&config, "not a hierarchical URL"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    /// Table and id are appended as percent-encoded path segments.
    fn url(&self, request: &TransportRequest) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid_base(&self.config, "not a hierarchical URL"))?;
            segments.pop_if_empty().push(&request.table);
            if let Some(id) = &request.server_id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }
}

fn invalid_base(config: &HttpConfig, reason: impl std::fmt::Display) -> Error {
    Error::Transport {
        status: None,
        reason: format!("invalid base url '{}': {reason}", config.base_url),
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::Transport {
        status: err.status().map(|s| s.as_u16()),
        reason: err.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<serde_json::Value> {
        let url = self.url(&request)?;
        let mut builder = match (request.method, &request.server_id) {
            (Method::Read, _) => self.client.get(url.clone()),
            (Method::Create, _) => self.client.post(url.clone()),
            (Method::Update, Some(_)) => self.client.put(url.clone()),
            (Method::Delete, Some(_)) => self.client.delete(url.clone()),
            (method, None) => {
                return Err(Error::Transport {
                    status: None,
                    reason: format!("{method} needs a record target"),
                })
            }
        };
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %url, "Sending request");
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(request.target()));
        }
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(Error::Transport {
                status: Some(status.as_u16()),
                reason: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            });
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Transport {
            status: Some(status.as_u16()),
            reason: format!("malformed response body: {e}"),
        })
    }
}
