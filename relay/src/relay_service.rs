use crate::connection::serve_client;
use crate::errors::RelayError;
use crate::hub::{BackendEvent, RelayHub};
use http::Method;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use shared::http::{ResponseBody, make_error_response, make_json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const SOCKET_PATH: &str = "/socket";
pub const BACKEND_EVENT_PATH: &str = "/backend-event";

const MAX_EVENT_BODY_BYTES: usize = 1024 * 1024;

/// Client-facing listener: the relay websocket and HTTP ingestion of
/// backend events.
pub struct RelayService {
    hub: Arc<RelayHub>,
}

impl RelayService {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub }
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<ResponseBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let hub = self.hub.clone();

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let res = match (method, path.as_str()) {
                (Method::GET, SOCKET_PATH) => upgrade(hub, req),
                (Method::POST, BACKEND_EVENT_PATH) => ingest(hub, req).await,
                _ => make_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

fn upgrade(hub: Arc<RelayHub>, mut req: Request<Incoming>) -> Response<ResponseBody> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return make_error_response(StatusCode::BAD_REQUEST);
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            tracing::warn!(error = %e, "websocket upgrade failed");
            return make_error_response(StatusCode::BAD_REQUEST);
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(socket) => serve_client(hub, socket).await,
            Err(e) => tracing::warn!(error = %e, "websocket handshake failed"),
        }
    });

    response.map(|body| body.boxed())
}

async fn ingest(hub: Arc<RelayHub>, req: Request<Incoming>) -> Response<ResponseBody> {
    let body = match Limited::new(req.into_body(), MAX_EVENT_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read backend event body");
            return make_error_response(StatusCode::BAD_REQUEST);
        }
    };

    let event: BackendEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return make_json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "success": false, "message": e.to_string() }),
            );
        }
    };

    let delivered = hub.ingest_backend_event(event);
    make_json_response(
        StatusCode::OK,
        &json!({ "success": true, "delivered": delivered }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{hub, mark_healthy, serve_on_ephemeral_port};
    use fleet::types::Envelope;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    const CLOSED: &str = "test-backend-closed";

    async fn connect(port: u16) -> Client {
        let (socket, _) = connect_async(format!("ws://127.0.0.1:{port}{SOCKET_PATH}"))
            .await
            .unwrap();
        socket
    }

    async fn send(client: &mut Client, event: &str, data: serde_json::Value) {
        let envelope = Envelope::new(event, data);
        client.send(Message::Text(envelope.to_json())).await.unwrap();
    }

    async fn next_envelope(client: &mut Client) -> Envelope {
        loop {
            let frame = timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = frame {
                return Envelope::from_json(&text).unwrap();
            }
        }
    }

    /// Websocket server standing in for a backend's session socket. Accepts
    /// one connection; received envelopes come out of the first channel and
    /// envelopes pushed into the second are sent to the gateway.
    async fn fake_backend() -> (
        String,
        mpsc::UnboundedReceiver<Envelope>,
        mpsc::UnboundedSender<Envelope>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    frame = ws.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(Envelope::from_json(&text).unwrap());
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            let _ = received_tx.send(Envelope::new(CLOSED, serde_json::Value::Null));
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                    Some(envelope) = push_rx.recv() => {
                        ws.send(Message::Text(envelope.to_json())).await.unwrap();
                    }
                }
            }
        });

        (format!("http://{addr}"), received_rx, push_tx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for the backend")
            .unwrap()
    }

    #[tokio::test]
    async fn test_http_backend_event_is_replayed_on_join() {
        let hub = hub(&[("a", "http://127.0.0.1:1")]);
        let port = serve_on_ephemeral_port(RelayService::new(hub)).await;

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}{BACKEND_EVENT_PATH}"))
            .json(&json!({
                "authId": "u1",
                "phoneNumber": "p1",
                "event": "qr",
                "payload": {"qr": "ABC"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["delivered"], 0);

        let mut client = connect(port).await;
        send(&mut client, "join-session-room", json!({"authId": "u1", "phoneNumber": "p1"})).await;
        assert_eq!(
            next_envelope(&mut client).await,
            Envelope::new("qr", json!({"qr": "ABC"}))
        );
    }

    #[tokio::test]
    async fn test_invalid_backend_event_rejected() {
        let hub = hub(&[("a", "http://127.0.0.1:1")]);
        let port = serve_on_ephemeral_port(RelayService::new(hub)).await;

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}{BACKEND_EVENT_PATH}"))
            .body("{\"event\": \"qr\"}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let response = reqwest::get(format!("http://127.0.0.1:{port}/elsewhere"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_socket_backend_event_then_join() {
        let hub = hub(&[("a", "http://127.0.0.1:1")]);
        let port = serve_on_ephemeral_port(RelayService::new(hub)).await;

        let mut client = connect(port).await;
        send(
            &mut client,
            "backend-event",
            json!({"authId": "u1", "phoneNumber": "p1", "event": "pairingCode", "payload": {"code": "1234"}}),
        )
        .await;
        send(
            &mut client,
            "backend-event",
            json!({"authId": "u1", "phoneNumber": "p1", "event": "qr", "payload": {"qr": "ABC"}}),
        )
        .await;
        send(&mut client, "join-session-room", json!({"authId": "u1", "phoneNumber": "p1"})).await;

        assert_eq!(
            next_envelope(&mut client).await,
            Envelope::new("qr", json!({"qr": "ABC"}))
        );
        assert_eq!(
            next_envelope(&mut client).await,
            Envelope::new("pairingCode", json!({"code": "1234"}))
        );
    }

    #[tokio::test]
    async fn test_register_without_capacity() {
        let hub = hub(&[("a", "http://127.0.0.1:1")]);
        let port = serve_on_ephemeral_port(RelayService::new(hub.clone())).await;

        let mut client = connect(port).await;
        send(&mut client, "register-bot-session", json!({"authId": "u1", "phoneNumber": "p1"})).await;

        let envelope = next_envelope(&mut client).await;
        assert_eq!(envelope.event, "session-unavailable");
        assert!(envelope.data["message"].is_string());
        assert!(hub.fleet().store().find(&fleet::types::SessionKey::new("u1", "p1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_binds_client_to_backend() {
        let (backend_url, mut received, push) = fake_backend().await;
        let hub = hub(&[("a", backend_url.as_str())]);
        mark_healthy(&hub, "a", 0);
        let port = serve_on_ephemeral_port(RelayService::new(hub.clone())).await;

        let mut client = connect(port).await;
        let mut watcher = connect(port).await;
        let key = json!({"authId": "u1", "phoneNumber": "p1"});
        send(&mut watcher, "join-session-room", key.clone()).await;
        send(&mut client, "join-session-room", key.clone()).await;
        send(&mut client, "register-bot-session", key.clone()).await;

        // The backend hears about the session as soon as the link opens
        assert_eq!(
            recv(&mut received).await,
            Envelope::new("register-bot-session", key.clone())
        );

        // Backend events reach every client in the room and are cached
        push.send(Envelope::new("qr", json!({"qr": "XYZ"}))).unwrap();
        let expected = Envelope::new("qr", json!({"qr": "XYZ"}));
        assert_eq!(next_envelope(&mut client).await, expected);
        assert_eq!(next_envelope(&mut watcher).await, expected);
        assert_eq!(hub.cache().replay("u1:p1"), vec![expected]);

        // Client events pass through verbatim; gateway events do not
        send(&mut client, "join-session-room", key.clone()).await;
        send(&mut client, "logout", json!({"reason": "user"})).await;
        assert_eq!(
            recv(&mut received).await,
            Envelope::new("logout", json!({"reason": "user"}))
        );

        // The rejoin replayed the cached QR
        assert_eq!(
            next_envelope(&mut client).await,
            Envelope::new("qr", json!({"qr": "XYZ"}))
        );

        // Closing the client tears down its backend link only
        client.close(None).await.unwrap();
        assert_eq!(recv(&mut received).await.event, CLOSED);
        assert_eq!(hub.rooms().members("u1:p1"), 1);
    }

    #[tokio::test]
    async fn test_client_events_dropped_without_link() {
        let (backend_url, mut received, _push) = fake_backend().await;
        let hub = hub(&[("a", backend_url.as_str())]);
        let port = serve_on_ephemeral_port(RelayService::new(hub)).await;

        let mut client = connect(port).await;
        send(&mut client, "logout", json!({})).await;
        client.close(None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(received.try_recv().is_err());
    }

    async fn recv_tagged(rx: &mut mpsc::UnboundedReceiver<(usize, Envelope)>) -> (usize, Envelope) {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for the backend")
            .unwrap()
    }

    #[tokio::test]
    async fn test_client_events_dropped_while_link_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, mut received) = mpsc::unbounded_channel::<(usize, Envelope)>();
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            // The first connection is closed right after the registration
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = received_tx.send((0, Envelope::from_json(&text).unwrap()));
            }
            let _ = ws.close(None).await;
            let _ = received_tx.send((0, Envelope::new(CLOSED, serde_json::Value::Null)));

            // Hold the redial in its handshake until the test lets it through
            accept_rx.recv().await;
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    let _ = received_tx.send((1, Envelope::from_json(&text).unwrap()));
                }
            }
        });

        let hub = hub(&[("a", format!("http://{addr}").as_str())]);
        mark_healthy(&hub, "a", 0);
        let port = serve_on_ephemeral_port(RelayService::new(hub)).await;

        let mut client = connect(port).await;
        let key = json!({"authId": "u1", "phoneNumber": "p1"});
        send(&mut client, "join-session-room", key.clone()).await;
        send(&mut client, "register-bot-session", key.clone()).await;

        let register = Envelope::new("register-bot-session", key.clone());
        assert_eq!(recv_tagged(&mut received).await, (0, register.clone()));
        assert_eq!(recv_tagged(&mut received).await.1.event, CLOSED);

        tokio::time::sleep(Duration::from_millis(200)).await;
        send(&mut client, "while-down", json!({})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        accept_tx.send(()).unwrap();
        assert_eq!(recv_tagged(&mut received).await, (1, register));

        tokio::time::sleep(Duration::from_millis(100)).await;
        send(&mut client, "after-up", json!({})).await;
        assert_eq!(recv_tagged(&mut received).await, (1, Envelope::new("after-up", json!({}))));
    }
}
