use crate::config::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::UserAgentLayer;
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Type-erased service an auth layer wraps (see [`HttpClientBuilder::with_auth_layer`]).
///
/// Requests carry a fully buffered body, so a layer can rebuild and resend
/// one from its cloned parts.
pub type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

type AuthWrap = Box<dyn FnOnce(InnerService) -> InnerService + Send>;

/// Fluent builder for [`HttpClient`](crate::HttpClient).
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    auth_layer: Option<AuthWrap>,
}

impl HttpClientBuilder {
    /// Builder over [`HttpClientConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Builder starting from `config`, typically one of its presets.
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            auth_layer: None,
        }
    }

    /// Per-attempt timeout. A replay issued by an auth layer gets a fresh one.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Limit applied by the body readers of [`HttpResponse`](crate::HttpResponse).
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Shortcut for `transport(TransportSecurity::AllowInsecureHttp)`.
    ///
    /// Only compiled into debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "tokengate_http::security",
            "allow_insecure_http() called: traffic to http:// URLs is unencrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Insert an auth layer directly inside the request buffer.
    ///
    /// Stack position: `Buffer → **this layer** → ErrorMapping → Timeout → …`
    ///
    /// Everything below the layer runs once per dispatch, so a layer that
    /// replays a request gets a fresh timeout and a fresh `User-Agent` on the
    /// replay. Only one auth layer can be set; a second call replaces the first.
    #[must_use]
    pub fn with_auth_layer(
        mut self,
        wrap: impl FnOnce(InnerService) -> InnerService + Send + 'static,
    ) -> Self {
        self.auth_layer = Some(Box::new(wrap));
        self
    }

    /// Assemble the middleware stack and spawn the buffer worker.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `HttpError::Tls` if the root store cannot be loaded,
    /// `HttpError::InvalidHeaderValue` if the user agent is not a valid header.
    pub fn build(self) -> Result<crate::HttpClient, HttpError> {
        let HttpClientConfig {
            request_timeout,
            max_body_size,
            user_agent,
            transport,
            tls_roots,
            buffer_capacity,
            pool_idle_timeout,
            pool_max_idle_per_host,
        } = self.config;

        if transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!("building HTTP client that accepts plain http:// URLs");
        }

        let connector = build_https_connector(tls_roots, transport)?;

        let mut pool = Client::builder(TokioExecutor::new());
        // the idle timeout needs a timer to fire
        pool.pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .pool_idle_timeout(pool_idle_timeout);
        let hyper_client = pool.build::<_, Full<Bytes>>(connector);

        // Outer → inner:
        //   Buffer → [auth layer] → error mapping → Timeout → User-Agent →
        //   Decompression → hyper
        //
        // Every HTTP status is an Ok response here; only transport, timeout
        // and TLS failures surface as errors.
        let stack = ServiceBuilder::new()
            .layer(TimeoutLayer::new(request_timeout))
            .layer(UserAgentLayer::try_new(&user_agent)?)
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, request_timeout));

        let mut service = stack.boxed_clone();
        if let Some(wrap) = self.auth_layer {
            service = wrap(service);
        }

        Ok(crate::HttpClient {
            service: Buffer::new(service, buffer_capacity.max(1)),
            max_body_size,
            transport_security: transport,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeouts become `HttpError::Timeout`; an `HttpError` boxed by a layer is unwrapped.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}

/// HTTPS connector advertising h2 and http/1.1 over ALPN.
fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let with_roots = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            let client_config =
                tls::native_roots_client_config().map_err(|e| HttpError::Tls(e.into()))?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config)
        }
    };

    let connector = match transport {
        TransportSecurity::TlsOnly => with_roots.https_only().enable_all_versions().build(),
        TransportSecurity::AllowInsecureHttp => {
            with_roots.https_or_http().enable_all_versions().build()
        }
    };
    Ok(connector)
}
