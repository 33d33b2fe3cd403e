use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Type-erased response body (already decompressed).
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// HTTP response with size-limited body readers.
///
/// No reader looks at the status: a `401` or `500` body is read like any
/// other, and deciding what a status means is left to the caller.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// As [`bytes`](Self::bytes), plus `HttpError::Json`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Read the body as lossy UTF-8.
    ///
    /// # Errors
    /// As [`bytes`](Self::bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Collect a body, counting decompressed bytes against `limit`.
async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(HttpError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response(status: StatusCode, body: &'static str, max: usize) -> HttpResponse {
        let body: ResponseBody = Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
            .boxed();
        let mut inner = Response::new(body);
        *inner.status_mut() = status;
        inner
            .headers_mut()
            .insert(http::header::CONTENT_TYPE, "text/plain".parse().unwrap());
        HttpResponse {
            inner,
            max_body_size: max,
        }
    }

    #[tokio::test]
    async fn bytes_ignores_status() {
        let resp = response(StatusCode::UNAUTHORIZED, "nope", 1024);
        assert_eq!(&resp.bytes().await.unwrap()[..], b"nope");
    }

    #[tokio::test]
    async fn error_status_body_is_readable() {
        let resp = response(StatusCode::FORBIDDEN, "denied", 1024);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "text/plain");
        assert_eq!(resp.text().await.unwrap(), "denied");
    }

    #[tokio::test]
    async fn body_over_limit_is_rejected() {
        let resp = response(StatusCode::OK, "0123456789", 4);
        assert!(matches!(
            resp.bytes().await,
            Err(HttpError::BodyTooLarge { limit: 4, actual: 10 })
        ));
    }
}
