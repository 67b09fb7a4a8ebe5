//! HTTP front for the cache controller
//!
//! Accepts plain HTTP/1 requests, turns them into [`FetchRequest`]s, and
//! lets the controller answer them once the worker is activated. Anything
//! the controller does not intercept is forwarded through the network
//! untouched.

use crate::controller::{FetchEvent, FetchOutcome, OfflineController, PreloadResponse};
use crate::error::{OfflineError, Result};
use crate::lifecycle::LifecycleManager;
use crate::models::{FetchRequest, Generation, HttpResponse, RequestMode};
use crate::network::{FetchOptions, Network};
use http::header::{ACCEPT, CONNECTION, HOST, TRANSFER_ENCODING};
use http::request::Parts;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use reqwest::Url;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// Serves intercepted traffic for one scope
pub struct OfflineServer {
    controller: Arc<OfflineController>,
    lifecycle: Arc<LifecycleManager>,
    network: Arc<dyn Network>,
    current: RwLock<Option<Generation>>,
    scope: Url,
}

impl OfflineServer {
    pub fn new(
        controller: Arc<OfflineController>,
        lifecycle: Arc<LifecycleManager>,
        network: Arc<dyn Network>,
    ) -> Self {
        let scope = controller.router().scope().clone();
        OfflineServer {
            controller,
            lifecycle,
            network,
            current: RwLock::new(None),
            scope,
        }
    }

    /// Generation passed to the controller for every intercepted request
    pub fn set_generation(&self, generation: Generation) {
        info!("Serving generation {}", generation);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(generation);
    }

    pub fn current_generation(&self) -> Option<Generation> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn controller(&self) -> &Arc<OfflineController> {
        &self.controller
    }

    /// Answer one request
    pub async fn handle(&self, request: FetchRequest) -> HttpResponse {
        let generation = match self.current_generation() {
            Some(generation) if self.lifecycle.can_intercept() => generation,
            _ => {
                debug!(
                    "Worker is {}, forwarding {} {}",
                    self.lifecycle.state(),
                    request.method,
                    request.url
                );
                return self.forward(&request).await;
            }
        };

        let mut event = FetchEvent::new(request.clone());
        if request.is_navigation()
            && request.method == Method::GET
            && self.lifecycle.navigation_preload_enabled()
        {
            event = event.with_preload(self.start_preload(&request));
        }

        match self.controller.handle_fetch(&generation, event).await {
            FetchOutcome::Respond { response, .. } => response,
            FetchOutcome::NotHandled(reason) => {
                debug!("Not intercepted ({:?}): {}", reason, request.url);
                self.forward(&request).await
            }
        }
    }

    /// Start the navigation fetch now so it overlaps with routing
    fn start_preload(&self, request: &FetchRequest) -> PreloadResponse {
        let network = Arc::clone(&self.network);
        let request = request.clone();
        let handle = tokio::spawn(async move {
            network.fetch(&request, &FetchOptions::default()).await
        });

        Box::pin(async move {
            match handle.await {
                Ok(result) => result.map(Some),
                Err(e) => Err(OfflineError::InternalError(format!(
                    "preload task failed: {}",
                    e
                ))),
            }
        })
    }

    async fn forward(&self, request: &FetchRequest) -> HttpResponse {
        match self.network.fetch(request, &FetchOptions::default()).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Forwarding {} {} failed: {}", request.method, request.url, e);
                error_response(&e)
            }
        }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Offline shell cache listening on http://{} (scope {})", addr, self.scope);

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    async move { server.handle_hyper(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }

    async fn handle_hyper(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let e = OfflineError::ParseError(format!("unreadable request body: {}", e));
                warn!("{}", e);
                return Ok(into_hyper_response(error_response(&e)));
            }
        };

        let request = match to_fetch_request(&parts, body, &self.scope) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting request for {}: {}", parts.uri, e);
                return Ok(into_hyper_response(error_response(&e)));
            }
        };

        Ok(into_hyper_response(self.handle(request).await))
    }
}

/// Build the intercepted request from an incoming HTTP request
///
/// Origin-form targets are resolved against the scope; absolute-form
/// targets keep their own origin.
pub fn to_fetch_request(parts: &Parts, body: Bytes, scope: &Url) -> Result<FetchRequest> {
    let url = if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        Url::parse(&parts.uri.to_string())
    } else {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        scope.join(target)
    }
    .map_err(|e| OfflineError::ParseError(format!("invalid request target {}: {}", parts.uri, e)))?;

    let mut headers = parts.headers.clone();
    headers.remove(HOST);

    Ok(FetchRequest {
        method: parts.method.clone(),
        url,
        mode: request_mode(parts),
        headers,
        body,
    })
}

/// Empty response carrying the status an error maps to
fn error_response(err: &OfflineError) -> HttpResponse {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::new(status, Bytes::new())
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn request_mode(parts: &Parts) -> RequestMode {
    match header_str(parts, SEC_FETCH_MODE) {
        Some(mode) => match mode.trim().to_ascii_lowercase().as_str() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "cors" => RequestMode::Cors,
            _ => RequestMode::NoCors,
        },
        None => {
            let wants_html = header_str(parts, ACCEPT.as_str())
                .map(|accept| accept.contains("text/html"))
                .unwrap_or(false);
            if parts.method == Method::GET && wants_html {
                RequestMode::Navigate
            } else {
                RequestMode::NoCors
            }
        }
    }
}

/// Convert a response snapshot for hyper; the body is sent in full
pub fn into_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let HttpResponse {
        status,
        mut headers,
        body,
    } = response;
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONNECTION);

    let mut out = Response::new(Full::new(body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}
