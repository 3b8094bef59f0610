use std::convert::Infallible;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use http::{Method, Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use upload_bridge::{BridgeConfig, UploadIngress, UploadRegistry};

use crate::responder::{MethodNotAllowed, NotFound, Responder, ResponseBody, Uploaded};
use crate::router::UploadRouter;

#[derive(Debug, Default)]
pub struct ServerBuilder {
    address: Option<String>,
    registry: Option<UploadRegistry>,
    config: Option<BridgeConfig>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// The registry shared with every component that opens remote streams.
    pub fn registry(mut self, registry: UploadRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        let address = address
            .to_socket_addrs()
            .map_err(|source| ServerBuildError::InvalidAddress { address: address.clone(), source })?
            .collect::<Vec<_>>();
        let registry = self.registry.ok_or(ServerBuildError::MissingRegistry)?;
        let config = self.config.unwrap_or_default();

        let route = config.upload_route();
        let router = UploadRouter::new(&route).map_err(|source| ServerBuildError::InvalidRoute { route, source })?;
        let ingress = UploadIngress::new(registry, &config);

        Ok(Server { address, service: Arc::new(UploadService { router, ingress }) })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,

    #[error("invalid address {address}: {source}")]
    InvalidAddress { address: String, source: io::Error },

    #[error("upload registry must be set")]
    MissingRegistry,

    #[error("invalid upload route {route}: {source}")]
    InvalidRoute { route: String, source: matchit::InsertError },
}

/// Serves the one-time upload route over HTTP/1.1.
#[derive(Debug)]
pub struct Server {
    address: Vec<SocketAddr>,
    service: Arc<UploadService>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn address(&self) -> &[SocketAddr] {
        &self.address
    }

    /// Binds the configured address and serves until the process ends.
    pub async fn start(self) -> io::Result<()> {
        info!("start listening at {:?}", self.address);
        let tcp_listener = TcpListener::bind(self.address.as_slice()).await.inspect_err(|e| {
            error!(cause = %e, "bind server error");
        })?;

        self.serve(tcp_listener, CancellationToken::new()).await;
        Ok(())
    }

    /// Accepts connections from `tcp_listener` until `shutdown` fires.
    ///
    /// Connections already accepted keep running after shutdown.
    pub async fn serve(self, tcp_listener: TcpListener, shutdown: CancellationToken) {
        loop {
            let (tcp_stream, remote_addr) = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("server shutdown");
                    return;
                }
                accepted = tcp_listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                let handler = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move { Ok::<_, Infallible>(service.call(req).await) }
                });

                match http1::Builder::new().serve_connection(TokioIo::new(tcp_stream), handler).await {
                    Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                    Err(e) => error!(%remote_addr, cause = %e, "service has error, connection shutdown"),
                }
            });
        }
    }
}

#[derive(Debug)]
struct UploadService {
    router: UploadRouter,
    ingress: UploadIngress,
}

impl UploadService {
    async fn call(&self, req: Request<Incoming>) -> Response<ResponseBody> {
        let path = req.uri().path().to_owned();
        let Some(correlation_id) = self.router.at(&path) else {
            return NotFound.into_response();
        };

        if req.method() != Method::POST {
            return MethodNotAllowed.into_response();
        }

        self.ingress.handle_request(correlation_id, req).await.map(|()| Uploaded).into_response()
    }
}
