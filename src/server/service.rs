//! HTTP service implementation - assembles the router and starts the HTTP(S) server.

use anyhow::{Context, bail};
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::{fs, net::SocketAddr, sync::Arc};
use tokio_rustls::TlsAcceptor;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    server::handlers::{flow, health, metadata, proxy},
    state::{AppState, ApplicationState},
};

/// CORS configuration for the HTTP server.
///
/// Allows specifying allowed origins for cross-origin requests.
/// Supports "*" for all origins or a comma-separated list of origins.
#[derive(Debug, Clone, Default)]
pub struct Cors {
    /// Comma-separated list of allowed origins, or "*" for all origins.
    pub origins: String,
}

impl Cors {
    /// Creates a CorsLayer from the configuration.
    ///
    /// # Returns
    /// A configured CorsLayer with permissive methods and headers
    pub fn into_layer(self) -> CorsLayer {
        use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};

        let allow_origin = if self.origins.trim() == "*" {
            AllowOrigin::any()
        } else {
            let origin_list: Vec<_> = self
                .origins
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();

            tracing::debug!(
                "Parsed CORS origins: {:?} from {:?}",
                origin_list,
                self.origins
            );

            if origin_list.is_empty() {
                tracing::warn!("No valid CORS origins specified, defaulting to allow all");
                AllowOrigin::any()
            } else if origin_list.len() == 1 {
                AllowOrigin::exact(origin_list.into_iter().next().unwrap())
            } else {
                AllowOrigin::list(origin_list)
            }
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_headers(AllowHeaders::any())
            .allow_methods(AllowMethods::any())
    }
}

/// TLS certificate and key material.
struct TlsMaterial {
    /// PEM-encoded certificate chain.
    certs: Vec<u8>,
    /// PEM-encoded private key.
    key: Vec<u8>,
}

/// Checks if a file exists and is a regular file.
fn is_existing_file(path: &str) -> bool {
    let path = std::path::Path::new(path);
    path.exists() && path.is_file()
}

/// Loads TLS certificate and key material from the settings.
///
/// # Errors
/// Returns an error if TLS is not configured, the files don't exist, or
/// reading fails.
fn get_tls_key_material(state: &AppState) -> anyhow::Result<TlsMaterial> {
    let tls_cert = state.settings.tls.cert.clone().unwrap_or_default();
    let tls_key = state.settings.tls.key.clone().unwrap_or_default();
    let use_tls = !(tls_key.is_empty() || tls_cert.is_empty());

    if !use_tls {
        bail!("No TLS configuration");
    }
    if !is_existing_file(tls_key.as_str()) {
        tracing::debug!("TLS key file {} could not be found", tls_key);
        bail!("Missing or empty key file");
    }
    if !is_existing_file(tls_cert.as_str()) {
        tracing::debug!("TLS cert file {} could not be found", tls_cert);
        bail!("Missing or empty cert file");
    }

    let cert_bytes =
        fs::read(&tls_cert).context(format!("Failed to read cert file {}", tls_cert))?;
    let key_bytes = fs::read(&tls_key).context(format!("Failed to read key file {}", tls_key))?;

    if cert_bytes.is_empty() || key_bytes.is_empty() {
        bail!("Key or cert is empty")
    }

    Ok(TlsMaterial {
        certs: cert_bytes,
        key: key_bytes,
    })
}

/// Handler for the Prometheus metrics endpoint.
#[cfg(feature = "prometheus")]
pub async fn metrics_handler() -> Response {
    use http_body_util::BodyExt;

    let hyper_response = crate::metrics::handler::make_metrics_response();

    // Convert hyper response to axum response
    let (parts, body) = hyper_response.into_parts();
    let body_bytes = body.collect().await.unwrap().to_bytes();

    Response::builder()
        .status(parts.status)
        .header(
            "content-type",
            parts
                .headers
                .get("content-type")
                .unwrap_or(&"text/plain".parse().unwrap()),
        )
        .body(Body::from(body_bytes))
        .unwrap()
}

/// Assembles the full application router.
///
/// Static routes (well-known documents, flow endpoints, health, metrics)
/// take precedence; the tenant forwarding wildcard catches the rest.
pub fn build_router(state: Arc<AppState>) -> Router {
    let health_router = Router::new()
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .with_state(state.clone());

    let mut router = Router::new()
        .merge(metadata::router(state.clone()))
        .merge(flow::router(state.clone()))
        .merge(health_router);

    #[cfg(feature = "prometheus")]
    {
        router = router.route("/metrics", get(metrics_handler));
    }

    router = router.merge(proxy::router(state));
    router.layer(middleware::from_fn(log_requests))
}

/// Main entry point for starting the server.
///
/// Builds the router, starts the correlation sweeper, and serves plain
/// HTTP or HTTPS depending on the TLS settings. Returns when the listener
/// stops or on ctrl-c.
pub async fn start(state: Arc<AppState>) -> anyhow::Result<()> {
    state.set_state(ApplicationState::StartingNetwork);

    crate::server::correlation::start_sweeper(state.correlation.clone());

    let mut app = build_router(state.clone());
    if let Some(origins) = &state.settings.cors_origins {
        app = app.layer(
            Cors {
                origins: origins.clone(),
            }
            .into_layer(),
        );
    }

    let tls_acceptor = match get_tls_key_material(&state) {
        Ok(material) => {
            let certs = rustls_pemfile::certs(&mut material.certs.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to parse certificates")?;
            let key = rustls_pemfile::private_key(&mut material.key.as_slice())
                .context("Failed to parse private key")?
                .ok_or_else(|| anyhow::anyhow!("No private key found in key file"))?;
            let config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .context("Failed to build TLS config")?;
            Some(Arc::new(TlsAcceptor::from(Arc::new(config))))
        }
        Err(e) => {
            tracing::debug!("TLS disabled: {}", e);
            None
        }
    };

    let addr = format!("0.0.0.0:{}", state.settings.port);

    let server_state = state.clone();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = run_server(app, addr, tls_acceptor, server_state).await {
            tracing::error!("Server error: {:?}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
        res = &mut server_handle => {
            match res {
                Ok(()) => tracing::debug!("Server exited normally"),
                Err(e) => tracing::error!("Server task panicked: {:?}", e),
            }
            state.set_state(ApplicationState::Terminating);
            return Ok(());
        }
    }

    state.set_state(ApplicationState::Terminating);
    server_handle.abort();
    let _ = server_handle.await;

    Ok(())
}

/// Runs the listener with the given configuration.
///
/// Binds to the specified address and serves the router, with optional
/// TLS. Marks the application Ready once the socket is bound.
async fn run_server(
    router: Router,
    addr: String,
    tls_acceptor: Option<Arc<TlsAcceptor>>,
    state: Arc<AppState>,
) -> anyhow::Result<()> {
    let sock_addr: SocketAddr = addr.parse()?;

    let app = router.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(sock_addr).await?;

    if let Some(acceptor) = tls_acceptor {
        state.set_state(ApplicationState::Ready);
        info!("Starting TLS server on https://{}", sock_addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let acceptor = acceptor.clone();
            let app = app.clone();

            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(stream).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("TLS accept failed: {}", e);
                        return;
                    }
                };
                let service = TowerToHyperService::new(app);
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls_stream), service)
                    .await;
            });
        }
    } else {
        state.set_state(ApplicationState::Ready);
        info!("Starting plain HTTP server on http://{}", sock_addr);
        axum::serve(listener, app).await?;
    }

    Ok(())
}

/// Middleware to log incoming requests and outgoing responses.
///
/// Logs request method and URI on entry, response status on exit. Bodies
/// are logged at trace level only; bearer tokens live in headers and never
/// reach the log.
async fn log_requests(req: Request<Body>, next: Next) -> Response {
    tracing::debug!("Received request: {} {}", req.method(), req.uri());

    let req = if tracing::level_enabled!(tracing::Level::TRACE) {
        let (parts, body) = req.into_parts();
        let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Failed to read request body: {}", e);
                return Response::builder()
                    .status(400)
                    .body(Body::empty())
                    .unwrap();
            }
        };
        if let Ok(body_str) = std::str::from_utf8(&body_bytes) {
            tracing::trace!("Request body: {}", body_str);
        } else {
            tracing::trace!("Request body: <binary data, {} bytes>", body_bytes.len());
        }
        Request::from_parts(parts, Body::from(body_bytes))
    } else {
        req
    };

    let response = next.run(req).await;

    tracing::debug!("Sending response: {} for request", response.status());
    response
}
