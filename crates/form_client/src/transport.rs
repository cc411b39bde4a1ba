use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Method};
use shared::domain::HttpMethod;
use url::Url;

use crate::{config::BodyEncoding, error::TransportError};

/// One serialized form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub pairs: Vec<(String, String)>,
    pub encoding: BodyEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl TransportResponse {
    pub fn declares_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("json"))
    }
}

#[async_trait]
pub trait FormTransport: Send + Sync {
    async fn send(&self, request: FormRequest) -> Result<TransportResponse, TransportError>;
}

pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl FormTransport for ReqwestTransport {
    async fn send(&self, request: FormRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .http
            .request(reqwest_method(request.method), request.url.clone());

        builder = if request.method.sends_query() {
            builder.query(&request.pairs)
        } else {
            match request.encoding {
                BodyEncoding::Urlencoded => builder.form(&request.pairs),
                BodyEncoding::Json => {
                    let body: serde_json::Map<String, serde_json::Value> = request
                        .pairs
                        .into_iter()
                        .map(|(name, value)| (name, serde_json::Value::String(value)))
                        .collect();
                    builder.json(&body)
                }
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}
