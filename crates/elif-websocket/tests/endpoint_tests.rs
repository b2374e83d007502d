//! Handshake and echo through both socket integrations

use elif_websocket::{serve, CloseReason, Handler, WebSocketConfig, WebSocketEndpoint};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

fn chat_endpoint() -> WebSocketEndpoint {
    WebSocketEndpoint::new(Handler::uppercase_echo()).protocols(["chat.v2", "chat"])
}

#[tokio::test]
async fn test_tungstenite_handshake_negotiates_and_echoes() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let endpoint = chat_endpoint();
    let server = tokio::spawn(async move { serve(server_io, &endpoint).await });

    let mut request = "ws://localhost/ws".into_client_request().unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("mqtt, chat"),
    );
    let (mut client, response) = tokio_tungstenite::client_async(request, client_io)
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("Sec-WebSocket-Protocol").unwrap(),
        "chat"
    );

    client.send(Message::Text("Hello, ".into())).await.unwrap();
    client.send(Message::Text("World!".into())).await.unwrap();
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        Message::Text("HELLO, ".into())
    );
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        Message::Text("WORLD!".into())
    );

    client.close(None).await.unwrap();
    while let Some(Ok(_)) = client.next().await {}

    let reason = server.await.unwrap().unwrap();
    assert!(matches!(reason, CloseReason::PeerClosed(_)));
}

#[tokio::test]
async fn test_tungstenite_fragments_large_replies() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let endpoint = WebSocketEndpoint::new(Handler::uppercase_echo())
        .with_config(WebSocketConfig::default().with_max_frame_size(Some(8)));
    let server = tokio::spawn(async move { serve(server_io, &endpoint).await });

    let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/ws", client_io)
        .await
        .unwrap();

    client
        .send(Message::Text("a reply longer than one frame".into()))
        .await
        .unwrap();
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        Message::Text("A REPLY LONGER THAN ONE FRAME".into())
    );

    client.close(None).await.unwrap();
    while let Some(Ok(_)) = client.next().await {}
    assert!(server.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_tungstenite_rejects_plain_http() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
    let endpoint = chat_endpoint();
    let server = tokio::spawn(async move { serve(server_io, &endpoint).await });

    client_io
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    assert!(server.await.unwrap().is_err());
}

#[tokio::test]
async fn test_axum_router_serves_websocket() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app: axum::Router = chat_endpoint().into_router("/ws");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("chat"));
    let (mut client, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("Sec-WebSocket-Protocol").unwrap(),
        "chat"
    );

    client.send(Message::Text("axum".into())).await.unwrap();
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        Message::Text("AXUM".into())
    );

    client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        Message::Binary(vec![1, 2, 3])
    );

    client.close(None).await.unwrap();
}
