//! Request client for the ChemicAI backend REST API
//!
//! All network traffic goes through the [`Transport`] trait so tests can
//! substitute a scripted transport; [`http::HttpTransport`] is the
//! reqwest-backed implementation.

pub mod http;

use crate::normalize::{
    normalize_history, GenerationDetail, GenerationResult, EchoedParameters, HistoryEntry,
};
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors surfaced by the client
#[derive(Error, Debug)]
pub enum ChemError {
    /// Local precondition failure; no network call was made.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Transport-level failure. Never retried automatically.
    #[error("Network error calling {url}: {message} ({hint})")]
    Network {
        url: String,
        message: String,
        hint: String,
    },

    /// The backend answered with a non-success status.
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// A success response carried a body that was not valid JSON.
    #[error("Unexpected response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the transport layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out waiting for response")]
    Timeout,
}

/// HTTP method subset the backend contract needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Request body variants
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Empty,
}

/// One outgoing API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

/// The raw answer: status plus body text
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for the HTTP layer
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Sampling algorithm accepted by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "CMA-ES")]
    CmaEs,
    Spherical,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::CmaEs => f.write_str("CMA-ES"),
            Algorithm::Spherical => f.write_str("Spherical"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cma-es" | "cmaes" => Ok(Algorithm::CmaEs),
            "spherical" => Ok(Algorithm::Spherical),
            other => Err(format!("unknown algorithm: {other} (expected CMA-ES or Spherical)")),
        }
    }
}

/// Molecular property the optimization targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Property {
    #[serde(rename = "QED")]
    Qed,
    #[serde(rename = "plogP")]
    PLogP,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Qed => f.write_str("QED"),
            Property::PLogP => f.write_str("plogP"),
        }
    }
}

impl FromStr for Property {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qed" => Ok(Property::Qed),
            "plogp" => Ok(Property::PLogP),
            other => Err(format!("unknown property: {other} (expected QED or plogP)")),
        }
    }
}

/// A molecule-generation request as the user configures it
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Structural input; opaque to this crate, required non-empty.
    pub smiles: String,
    pub num_molecules: u32,
    pub algorithm: Algorithm,
    pub property: Property,
    /// Sent to the backend as its logical inverse (`minimize`).
    pub maximize: bool,
    /// Similarity constraint in [0, 1].
    pub similarity: f64,
    pub particles: u32,
    pub iterations: u32,
}

impl GenerationRequest {
    /// Defaults mirror the input form's initial state.
    pub fn new(smiles: impl Into<String>) -> Self {
        Self {
            smiles: smiles.into(),
            num_molecules: 25,
            algorithm: Algorithm::CmaEs,
            property: Property::Qed,
            maximize: true,
            similarity: 0.3,
            particles: 30,
            iterations: 10,
        }
    }
}

/// Wire shape of the generation endpoint
#[derive(Serialize)]
struct WireGenerationRequest<'a> {
    smi_string: &'a str,
    num_molecules: u32,
    algorithm: Algorithm,
    property_to_optimize: Property,
    min_similarity: f64,
    particles: u32,
    iterations: u32,
    minimize: bool,
}

impl<'a> From<&'a GenerationRequest> for WireGenerationRequest<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        Self {
            smi_string: &request.smiles,
            num_molecules: request.num_molecules,
            algorithm: request.algorithm,
            property_to_optimize: request.property,
            min_similarity: request.similarity,
            particles: request.particles,
            iterations: request.iterations,
            minimize: !request.maximize,
        }
    }
}

/// Client for the backend REST contract.
///
/// Bearer-authenticated calls attach the token only when one is held;
/// a missing token is not rejected client-side, the server enforces.
pub struct ChemClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    token: Option<String>,
    secure_context: bool,
}

impl ChemClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            secure_context: false,
        }
    }

    /// Marks the caller as running in a secure context, enabling the
    /// mixed-content diagnostic for plain-HTTP targets.
    pub fn with_secure_context(mut self, secure: bool) -> Self {
        self.secure_context = secure;
        self
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn network_error(&self, url: String, err: TransportError) -> ChemError {
        let hint = if self.secure_context && url.starts_with("http:") {
            "possible mixed-content block: the caller context is secure while the API is plain HTTP"
        } else {
            "backend unreachable or the request was blocked; check connectivity and CORS"
        }
        .to_string();
        ChemError::Network {
            url,
            message: err.to_string(),
            hint,
        }
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ChemError> {
        let url = request.url.clone();
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| self.network_error(url, e))?;
        if !response.is_success() {
            return Err(server_error(response.status, &response.body));
        }
        Ok(response)
    }

    /// Obtains a bearer token. The backend takes the credentials
    /// form-encoded, with the email in the `username` field.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, ChemError> {
        let response = self
            .send(ApiRequest {
                method: Method::Post,
                url: self.url("/api/auth/token"),
                bearer: None,
                body: RequestBody::Form(vec![
                    ("username".to_string(), username.to_string()),
                    ("password".to_string(), password.to_string()),
                ]),
            })
            .await?;

        let value: Value = serde_json::from_str(&response.body)?;
        let token = value
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ChemError::Server {
                status: response.status,
                message: "token response missing access_token".to_string(),
            })?
            .to_string();
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Creates an account. The server's `detail` message is surfaced on
    /// failure; registering does not log in by itself.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ChemError> {
        self.send(ApiRequest {
            method: Method::Post,
            url: self.url("/api/users/"),
            bearer: None,
            body: RequestBody::Json(serde_json::json!({
                "username": username,
                "email": email,
                "password": password,
            })),
        })
        .await?;
        Ok(())
    }

    /// Ends the server-side session. The response is ignored and a failed
    /// request only logs a warning; the local token is dropped either way.
    pub async fn logout(&mut self) {
        let url = self.url("/api/auth/logout");
        let request = ApiRequest {
            method: Method::Post,
            url: url.clone(),
            bearer: self.token.clone(),
            body: RequestBody::Empty,
        };
        if let Err(e) = self.transport.execute(request).await {
            warn!(%url, error = %e, "logout request failed");
        }
        self.token = None;
    }

    /// Submits a generation request.
    ///
    /// An empty or whitespace SMILES fails validation before any transport
    /// activity. The result is stamped with a client-side capture time.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ChemError> {
        if request.smiles.trim().is_empty() {
            return Err(ChemError::Validation(
                "SMILES string is empty; fill it in before running".to_string(),
            ));
        }

        let wire = WireGenerationRequest::from(request);
        let response = self
            .send(ApiRequest {
                method: Method::Post,
                url: self.url("/api/chem/generate"),
                bearer: self.token.clone(),
                body: RequestBody::Json(serde_json::to_value(&wire)?),
            })
            .await?;

        let value: Value = serde_json::from_str(&response.body)?;
        Ok(GenerationResult::from_response(&value, Local::now()))
    }

    /// Fetches the history listing, normalized per entry.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ChemError> {
        let response = self
            .send(ApiRequest {
                method: Method::Get,
                url: self.url("/api/chem/history"),
                bearer: self.token.clone(),
                body: RequestBody::Empty,
            })
            .await?;

        let value: Value = serde_json::from_str(&response.body)?;
        Ok(normalize_history(&value))
    }

    /// Fetches one past generation: the output plus the echoed request
    /// parameters for restoring the form.
    pub async fn history_detail(&self, generation_id: &str) -> Result<GenerationDetail, ChemError> {
        let response = self
            .send(ApiRequest {
                method: Method::Get,
                url: self.url(&format!(
                    "/api/chem/history/{}",
                    urlencoding::encode(generation_id)
                )),
                bearer: self.token.clone(),
                body: RequestBody::Empty,
            })
            .await?;

        let value: Value = serde_json::from_str(&response.body)?;
        Ok(GenerationDetail {
            result: GenerationResult::from_response(&value, Local::now()),
            echoed: EchoedParameters::from_value(&value),
        })
    }
}

/// Extracts an error message from a failure response, best effort:
/// JSON `detail`, then `message`, then the raw body, then the bare status.
fn server_error(status: u16, body: &str) -> ChemError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("detail")
                .and_then(Value::as_str)
                .or_else(|| v.get("message").and_then(Value::as_str))
                .map(str::to_string)
        })
        .or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .unwrap_or_else(|| format!("HTTP {status}"));
    ChemError::Server { status, message }
}
