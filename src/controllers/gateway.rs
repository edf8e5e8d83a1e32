use actix_web::web::{Bytes, Data};
use actix_web::{HttpRequest, HttpResponse};

use crate::error::GatewayError;
use crate::gateway::{Gateway, GatewayRequest};

/// Fallback handler: every request not served by the admin API goes
/// through the gateway routes. Unknown routes get the 404 envelope.
pub async fn proxy(req: HttpRequest, body: Bytes, gateway: Data<Gateway>) -> HttpResponse {
    let request = GatewayRequest::from_http(&req, body);
    let method = request.method.clone();
    let path = request.path.clone();
    let request_id = request.request_id.clone();

    match gateway.handle(request).await {
        Some(response) => response,
        None => {
            ::tracing::debug!(method = %method, path = %path, "No gateway route matched");
            GatewayError::NotFound(format!("no route for {} {}", method, path)).to_response(&request_id)
        }
    }
}
