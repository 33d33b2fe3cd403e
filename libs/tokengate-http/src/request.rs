use crate::client::{BufferedService, map_buffer_error, try_acquire_buffer_slot};
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Request, Response};
use http_body_util::Full;
use serde::Serialize;
use tower::Service;

#[derive(Clone, Debug)]
enum Body {
    Empty,
    Json(Bytes),
}

impl Body {
    fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Body::Json(_) => Some("application/json"),
            Body::Empty => None,
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Json(b) => b,
        }
    }
}

/// HTTP request builder.
///
/// Created by [`HttpClient::request`](crate::HttpClient::request) and the
/// per-method shortcuts. Header errors are deferred and reported by
/// [`send()`](RequestBuilder::send), so calls can be chained freely.
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Body,
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        method: http::Method,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            headers: Vec::new(),
            body: Body::Empty,
            error: None,
            transport_security,
        }
    }

    /// Add a single header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_none() {
            self.push_header(name, value);
        }
        self
    }

    /// Add several headers; stops at the first invalid one
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            if self.error.is_some() {
                break;
            }
            self.push_header(name.as_ref(), value.as_ref());
        }
        self
    }

    fn push_header(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
    }

    /// Set a JSON body (`Content-Type: application/json` unless already set)
    ///
    /// # Errors
    ///
    /// Returns a deferred header error or `HttpError::Json` when serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = Body::Json(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    fn validate_url(&self) -> Result<http::Uri, HttpError> {
        let invalid = |kind, reason: String| HttpError::InvalidUri {
            url: self.url.clone(),
            kind,
            reason,
        };

        let uri: http::Uri = self
            .url
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(InvalidUriKind::ParseError, e.to_string()))?;

        if uri.authority().is_none() {
            return Err(invalid(
                InvalidUriKind::MissingAuthority,
                "missing host/authority".to_owned(),
            ));
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.transport_security {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(invalid(InvalidUriKind::MissingScheme, "missing scheme".to_owned())),
        }
    }

    /// Send the request.
    ///
    /// Resolves to `Ok` for every HTTP status, including 4xx and 5xx.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` for deferred builder errors, rejected URLs,
    /// transport and TLS failures, timeouts, a full request queue and
    /// auth layer failures.
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.validate_url()?;

        let mut builder = Request::builder().method(self.method).uri(uri);

        let has_content_type = self.headers.iter().any(|(name, _)| name == CONTENT_TYPE);
        if !has_content_type && let Some(ct) = self.body.default_content_type() {
            builder = builder.header(CONTENT_TYPE, ct);
        }

        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let request = builder.body(Full::new(self.body.into_bytes()))?;

        try_acquire_buffer_slot(&mut self.service).await?;

        let inner: Response<ResponseBody> =
            self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::HttpClient;
    use httpmock::prelude::*;

    fn client(transport: TransportSecurity) -> HttpClient {
        HttpClient::builder().transport(transport).build().unwrap()
    }

    #[tokio::test]
    async fn relative_url_is_rejected() {
        let result = client(TransportSecurity::TlsOnly)
            .get("/relative")
            .send()
            .await;
        assert!(matches!(
            result,
            Err(HttpError::InvalidUri {
                kind: InvalidUriKind::MissingAuthority,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn plain_http_rejected_when_tls_only() {
        let result = client(TransportSecurity::TlsOnly)
            .get("http://localhost:1/x")
            .send()
            .await;
        assert!(matches!(result, Err(HttpError::InvalidScheme { .. })));
    }

    #[tokio::test]
    async fn ftp_scheme_rejected() {
        let result = client(TransportSecurity::AllowInsecureHttp)
            .get("ftp://example.com/file")
            .send()
            .await;
        assert!(
            matches!(result, Err(HttpError::InvalidScheme { ref scheme, .. }) if scheme == "ftp")
        );
    }

    #[tokio::test]
    async fn invalid_header_is_deferred_to_send() {
        let result = client(TransportSecurity::AllowInsecureHttp)
            .get("http://localhost:1/x")
            .header("bad header", "v")
            .header("x-ok", "v")
            .send()
            .await;
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
    }

    #[tokio::test]
    async fn json_body_sets_content_type() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/items")
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"name": "widget"}));
            then.status(201);
        });

        let url = format!("{}/items", server.base_url());
        let resp = client(TransportSecurity::AllowInsecureHttp)
            .post(&url)
            .json(&serde_json::json!({"name": "widget"}))
            .unwrap()
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::CREATED);
        mock.assert();
    }

    #[tokio::test]
    async fn explicit_content_type_wins() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/items")
                .header("content-type", "application/vnd.api+json");
            then.status(200);
        });

        let url = format!("{}/items", server.base_url());
        client(TransportSecurity::AllowInsecureHttp)
            .post(&url)
            .header("content-type", "application/vnd.api+json")
            .json(&serde_json::json!({}))
            .unwrap()
            .send()
            .await
            .unwrap();

        mock.assert();
    }
}
