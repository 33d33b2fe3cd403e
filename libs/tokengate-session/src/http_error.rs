/// Format a [`tokengate_http::HttpError`] with a context prefix.
///
/// No variant carries a response body, and unknown variants are reduced to
/// a generic message, so bodies never reach logs or error values through
/// this function.
#[must_use]
pub fn format_http_error(e: &tokengate_http::HttpError, prefix: &str) -> String {
    use tokengate_http::HttpError;

    match e {
        HttpError::Json(err) => format!("{prefix} JSON parse failed: {err}"),
        HttpError::Timeout(duration) => {
            format!("{prefix} request timed out after {duration:?}")
        }
        HttpError::Transport(err) => format!("{prefix} transport error: {err}"),
        HttpError::Tls(err) => format!("{prefix} TLS error: {err}"),
        HttpError::BodyTooLarge { limit, actual } => {
            format!("{prefix} response too large: limit {limit} bytes, got {actual} bytes")
        }
        HttpError::RequestBuild(err) => format!("{prefix} request build failed: {err}"),
        HttpError::InvalidHeaderName(err) => format!("{prefix} invalid header name: {err}"),
        HttpError::InvalidHeaderValue(_) => format!("{prefix} invalid header value"),
        HttpError::Overloaded => format!("{prefix} request rejected: service overloaded"),
        HttpError::ServiceClosed => format!("{prefix} service unavailable"),
        HttpError::InvalidUri { url, reason, .. } => {
            format!("{prefix} invalid URL '{url}': {reason}")
        }
        HttpError::InvalidScheme { scheme, reason } => {
            format!("{prefix} invalid scheme '{scheme}': {reason}")
        }
        HttpError::Auth(err) => format!("{prefix} authentication failed: {err}"),
        // Unknown variants may carry arbitrary Display output
        _ => format!("{prefix} request failed"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokengate_http::HttpError;

    #[test]
    fn json_error_excludes_body() {
        let parse = serde_json::from_str::<serde_json::Value>("{\"access_token\": secret-at}")
            .unwrap_err();
        let msg = format_http_error(&HttpError::Json(parse), "refresh");
        assert!(msg.starts_with("refresh JSON parse failed: "), "{msg}");
        assert!(!msg.contains("secret-at"));
    }

    #[test]
    fn timeout_includes_duration() {
        let msg = format_http_error(&HttpError::Timeout(Duration::from_secs(5)), "refresh");
        assert_eq!(msg, "refresh request timed out after 5s");
    }

    #[test]
    fn overloaded_and_closed() {
        assert_eq!(
            format_http_error(&HttpError::Overloaded, "x"),
            "x request rejected: service overloaded"
        );
        assert_eq!(
            format_http_error(&HttpError::ServiceClosed, "x"),
            "x service unavailable"
        );
    }
}
