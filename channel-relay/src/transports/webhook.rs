use super::{classify_request_error, classify_status};
use crate::types::{Payload, Result, Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

#[derive(Serialize)]
struct WebhookMessage<'a> {
    target: &'a str,
    payload: &'a Payload,
}

/// Posts each payload as JSON to a single URL; the target travels in the body.
pub struct WebhookTransport {
    client: Client,
    url: Url,
}

impl WebhookTransport {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, target: &str, payload: &Payload) -> std::result::Result<(), TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&WebhookMessage { target, payload })
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        classify_status(status, &detail)
    }
}
