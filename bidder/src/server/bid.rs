use std::{convert::Infallible, path::Path, sync::Arc};

use rama::{
    Layer as _, Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue, Request, Response, StatusCode,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
        service::web::{Router, response::IntoResponse},
    },
    net::address::SocketAddress,
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing::{self, Instrument as _},
};
use tokio::sync::oneshot;

use crate::{
    bid::{BidEndpoint, BidLifecycle, LifecycleOutcome, ResponseFraming},
    utils::env::network_service_identifier,
};

/// Serves `POST /bid` by spawning a [`BidLifecycle`] per request.
///
/// The service only waits on the lifecycle's response channel. When the
/// connection goes away hyper drops this future, and with it the receiver,
/// which the lifecycle observes as an abort.
#[derive(Debug, Clone)]
pub struct BidService {
    endpoint: Arc<BidEndpoint>,
    exec: Executor,
}

impl BidService {
    pub fn new(endpoint: Arc<BidEndpoint>, exec: Executor) -> Self {
        Self { endpoint, exec }
    }
}

impl Service<Request> for BidService {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let (parts, body) = req.into_parts();
        let framing = ResponseFraming::from_request_parts(parts.version, &parts.headers);

        let (reply_tx, reply_rx) = oneshot::channel();
        let lifecycle = BidLifecycle::new(self.endpoint.clone(), framing);
        self.exec.spawn_task(
            async move {
                if let LifecycleOutcome::Responded { hint, decision } =
                    lifecycle.run(body, reply_tx).await
                {
                    tracing::trace!(
                        bid.id = %hint.id,
                        delay.ms = decision.delay_ms,
                        "bid response handed over"
                    );
                }
            }
            .in_current_span(),
        );

        Ok(match reply_rx.await {
            Ok(resp) => resp,
            Err(_) => {
                tracing::error!("bid lifecycle ended without a response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        })
    }
}

/// Full HTTP service of a bid listener.
pub fn new_http_service(
    endpoint: Arc<BidEndpoint>,
    exec: Executor,
) -> impl Service<Request, Output = Response, Error = Infallible> + Clone {
    let router = Router::new()
        .with_get("/ping", StatusCode::OK)
        .with_post("/bid", BidService::new(endpoint, exec));

    Arc::new(
        (
            TraceLayer::new_for_http(),
            AddRequiredResponseHeadersLayer::new()
                .with_server_header_value(HeaderValue::from_static(network_service_identifier())),
        )
            .into_layer(router),
    )
}

/// A bound, not yet serving, bid listener.
pub struct BidListener {
    tcp_listener: TcpListener,
    exec: Executor,
    addr: SocketAddress,
    index: usize,
}

impl BidListener {
    /// Bind a bid listener.
    ///
    /// The bound address is written as `bid.<index>.addr.txt` into `data`.
    pub async fn bind(
        guard: ShutdownGuard,
        bind: SocketAddress,
        index: usize,
        data: &Path,
    ) -> Result<Self, BoxError> {
        let exec = Executor::graceful(guard);

        let tcp_listener = TcpListener::bind(bind, exec.clone())
            .await
            .context("bind bid http server")
            .context_field("address", bind)?;

        let addr: SocketAddress = tcp_listener
            .local_addr()
            .context("get bound address for bid http server")?
            .into();

        tracing::info!(
            bid.listener = index,
            "stub bidder listening on http://{addr}/bid"
        );
        crate::server::write_server_socket_address_as_file(data, &format!("bid.{index}"), addr)
            .await?;

        Ok(Self {
            tcp_listener,
            exec,
            addr,
            index,
        })
    }

    #[inline(always)]
    pub fn local_addr(&self) -> SocketAddress {
        self.addr
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Serve bid requests until shutdown.
    pub async fn serve(self, endpoint: Arc<BidEndpoint>) {
        let http_server =
            HttpServer::auto(self.exec.clone()).service(new_http_service(endpoint, self.exec));
        self.tcp_listener.serve(http_server).await;
    }
}
