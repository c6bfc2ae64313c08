//! Raw hyper HTTP entry point: accept loop with graceful drain, wrapping
//! [`Router::dispatch`] as a `hyper::service::service_fn`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::context::RequestContext;
use crate::router::Router;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

type ResponseBody = BoxBody<Bytes, Infallible>;

/// Serve `router` on `addr` until `shutdown` is notified, then drain
/// in-flight connections for up to 30s before returning.
pub async fn serve(router: Router, addr: SocketAddr, shutdown: Arc<Notify>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "chain-router: listening");

    let in_flight = Arc::new(tokio::sync::Semaphore::new(0));
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("chain-router: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "chain-router: accept failed");
                continue;
            }
        };

        active_conns.fetch_add(1, Ordering::Relaxed);
        let router = router.clone();
        in_flight.add_permits(1);
        let in_flight = in_flight.clone();
        let active_conns_task = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let router_inner = router.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let router = router_inner.clone();
                async move { Ok::<_, Infallible>(handle(router, req).await) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(peer = %peer_addr, error = %e, "chain-router: connection error");
                }
            }

            active_conns_task.fetch_sub(1, Ordering::Relaxed);
            let _ = in_flight.acquire().await;
        });
    }

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(active, "chain-router: draining in-flight connections");
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            info!(
                remaining = active_conns.load(Ordering::Relaxed),
                "chain-router: drain timeout, dropping remaining connections"
            );
        }
    }

    Ok(())
}

async fn handle(router: Router, req: Request<Incoming>) -> Response<ResponseBody> {
    let path = req.uri().path().to_string();
    let ctx = RequestContext::new(&path, req);
    let mut ctx = router.dispatch(ctx).await;
    build_response(&mut ctx)
}

fn build_response(ctx: &mut RequestContext) -> Response<ResponseBody> {
    let mut builder = Response::builder().status(ctx.response.status);
    for (name, value) in ctx.response.headers.iter() {
        builder = builder.header(name, value);
    }

    let body: ResponseBody = if ctx.response.is_streaming() {
        match ctx.response.take_stream_receiver() {
            Some(rx) => {
                let stream = UnboundedReceiverStream::new(rx).map(|bytes| Ok(Frame::data(bytes)));
                StreamBody::new(stream).boxed()
            }
            None => Full::new(Bytes::new()).map_err(|never: Infallible| match never {}).boxed(),
        }
    } else {
        Full::new(Bytes::copy_from_slice(ctx.response.body()))
            .map_err(|never: Infallible| match never {})
            .boxed()
    };

    builder.body(body).unwrap_or_else(|_| {
        Response::builder()
            .status(500)
            .body(Full::new(Bytes::new()).map_err(|never: Infallible| match never {}).boxed())
            .expect("a minimal 500 response is always constructible")
    })
}
