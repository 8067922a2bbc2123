//! HTTP/1 accept loop

use std::future::Future;

use futures::FutureExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::routes::{self, AppState};

/// Accept connections until `shutdown` resolves
///
/// Connections already accepted are served to completion on their own tasks.
pub(crate) async fn run(listener: TcpListener, state: AppState, shutdown: impl Future<Output = ()>) {
    let mut shutdown = std::pin::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("failed to accept connection: {:?}", e);
                        continue;
                    }
                }
            }
            () = &mut shutdown => break,
        };

        let state = state.clone();
        let svc = tower::service_fn(move |req: hyper::Request<Incoming>| routes::handle(state.clone(), req).boxed());

        tokio::spawn(async move {
            debug!(%remote, "Opened HTTP connection");
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), TowerToHyperService::new(svc))
                .await
            {
                debug!(%remote, error = %e, "HTTP connection ended with error");
            }
        });
    }

    info!("Stopped accepting connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mifare_classic::simulator::SimulatedCard;
    use mifare_classic::{Engine, EngineConfig, TransportAdapter};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use crate::discovery::BridgeTransport;

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let card = SimulatedCard::new();
        let adapter = Arc::new(TransportAdapter::new());
        adapter.on_reader_attached("Sim Reader", Box::new(card.clone()) as BridgeTransport);
        adapter.on_card_inserted(card.handle().atr());
        let state = AppState::new(Arc::new(Engine::new(adapter, EngineConfig::default())));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(run(listener, state, async {
            let _ = stopped.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /reader-status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap().to_lowercase();

        assert!(text.starts_with("http/1.1 200 ok"));
        assert!(text.contains("access-control-allow-origin: *"));
        assert!(text.contains("\"readername\":\"sim reader\""));

        stop.send(()).unwrap();
        server.await.unwrap();
    }
}
