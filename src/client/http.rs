//! reqwest-backed transport

use super::{ApiRequest, ApiResponse, Method, RequestBody, Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Production transport over a pooled reqwest client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        if let Some(token) = &request.bearer {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder = match request.body {
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Empty => builder,
        };

        let response = builder.send().await.map_err(map_transport_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_transport_err)?;
        Ok(ApiResponse { status, body })
    }
}

fn map_transport_err(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}
