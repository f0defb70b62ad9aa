use axum::http::HeaderMap;
use axum::{extract::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use tracing::info;

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    info!(
        target: "prizegate::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "prizegate::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

fn get_client_ip(request: &Request) -> String {
    if let Some(ip) = ip_from_headers(request.headers()) {
        return ip;
    }

    // Fallback to connection info
    if let Some(addr) = request.extensions().get::<SocketAddr>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

/// Best-effort caller identity for rate limiting, from proxy headers.
pub fn client_ip_from_headers(headers: &HeaderMap) -> String {
    ip_from_headers(headers).unwrap_or_else(|| "unknown".to_string())
}

fn ip_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_client_ip_with_forwarded_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        let ip = get_client_ip(&request);
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_with_real_ip_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        let ip = get_client_ip(&request);
        assert_eq!(ip, "203.0.113.1");
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        let ip = get_client_ip(&request);
        assert_eq!(ip, "unknown");
    }
}
