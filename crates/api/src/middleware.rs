use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use animforge_core::CallerId;

use crate::context::CallerContext;

/// Header carrying the caller identity.
pub const CALLER_HEADER: &str = "x-caller-id";

pub async fn caller_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let caller = extract_caller(req.headers())?;
    req.extensions_mut().insert(CallerContext::new(caller));
    Ok(next.run(req).await)
}

fn extract_caller(headers: &HeaderMap) -> Result<CallerId, StatusCode> {
    let header = headers.get(CALLER_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    CallerId::parse(header).map_err(|_| StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_header_is_required_and_trimmed() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_caller(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(CALLER_HEADER, HeaderValue::from_static("   "));
        assert_eq!(extract_caller(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(CALLER_HEADER, HeaderValue::from_static(" studio-7 "));
        assert_eq!(extract_caller(&headers).unwrap().as_str(), "studio-7");
    }
}
