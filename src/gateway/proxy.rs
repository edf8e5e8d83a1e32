use std::time::Duration;

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::{Method, StatusCode};
use actix_web::web::Bytes;

use crate::discovery::ServiceInstance;

/// Largest upstream body relayed back to the caller
pub const MAX_RESPONSE_BODY: usize = 10 * 1024 * 1024;

/// Inbound headers copied onto the outbound request
pub const FORWARDED_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "authorization",
    "cache-control",
    "content-type",
    "user-agent",
];

/// Upstream headers never relayed; the body is re-framed by the gateway
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-encoding",
];

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("upstream answered {0}")]
    ServerError(u16),

    #[error("failed to read upstream body: {0}")]
    Body(String),
}

/// Request sent to the chosen instance; request transforms edit it in place
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn path_and_query(&self) -> String {
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => format!("{}?{}", self.path, query),
            _ => self.path.clone(),
        }
    }

    pub fn set_header(&mut self, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
    }
}

/// Upstream response relayed to the caller; response transforms edit it in place
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn set_header(&mut self, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
    }

    /// Drop headers that describe the upstream connection rather than the payload
    pub fn strip_hop_by_hop(&mut self) {
        for name in HOP_BY_HOP_HEADERS {
            self.headers.remove(*name);
        }
    }
}

/// Copy the allow-listed headers of an inbound request
pub fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        for value in inbound.get_all(*name) {
            headers.append(HeaderName::from_static(name), value.clone());
        }
    }
    headers
}

/// Send `request` to `instance` and collect the full response.
///
/// A 5xx answer is an error so the breaker counts it; 4xx is relayed as is.
pub async fn forward(
    instance: &ServiceInstance,
    request: ProxyRequest,
    timeout: Duration,
) -> Result<ProxyResponse, ProxyError> {
    let url = format!("{}{}", instance.http_base_url(), request.path_and_query());
    let client = awc::Client::builder().timeout(timeout).finish();

    let mut outbound = client.request(request.method.clone(), url.as_str());
    for (name, value) in request.headers.iter() {
        outbound = outbound.append_header((name.clone(), value.clone()));
    }

    let sent = if request.body.is_empty() {
        outbound.send().await
    } else {
        outbound.send_body(request.body).await
    };
    let mut response = sent.map_err(|e| ProxyError::Request {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    let status = response.status();
    if status.is_server_error() {
        return Err(ProxyError::ServerError(status.as_u16()));
    }

    let body = response
        .body()
        .limit(MAX_RESPONSE_BODY)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        headers.append(name.clone(), value.clone());
    }

    Ok(ProxyResponse { status, headers, body })
}
