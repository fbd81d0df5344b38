//! Serving over a real socket.

use std::time::Duration;

use atomic_api::dispatch::{Handler, Params, RouteOptions};
use atomic_api::http::{Response, Server, ServerError};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize, Serialize)]
struct Widget {
    #[serde(default)]
    id: u64,
    name: String,
}

fn widget_server(builder: atomic_api::http::ServerBuilder) -> Server {
    let mut server = builder.versioning("1.0.0").build().unwrap();
    server
        .add_route(
            "/widgets",
            Handler::with_params(|Params(w): Params<Widget>| async move {
                Response::json(Widget { id: 1, name: w.name }).with_status(StatusCode::CREATED)
            }),
            RouteOptions::post(),
        )
        .unwrap();
    server
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn serve_and_shutdown() {
    let server = widget_server(Server::builder().addr("127.0.0.1:0"));
    let addr = server.serve().await.unwrap();
    assert!(server.is_running().await);

    let http = client();
    let res = http
        .post(format!("http://{addr}/api/1.0.0/widgets"))
        .json(&json!({"name": "foo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);
    assert_eq!(res.headers()["server"], "Atomic/1.0.0");
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({"id": 1, "name": "foo"}));

    server.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(!server.is_running().await);
    // Fresh client, so no pooled connection can be reused.
    assert!(client()
        .get(format!("http://{addr}/api/1.0.0/widgets"))
        .send()
        .await
        .is_err());
}

#[tokio::test]
async fn serving_twice_is_an_error() {
    let server = widget_server(Server::builder().addr("127.0.0.1:0"));
    server.serve().await.unwrap();

    assert!(matches!(server.serve().await, Err(ServerError::AlreadyRunning)));
    server.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn pre_bound_listener_is_used() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let bound = listener.local_addr().unwrap();

    let server = widget_server(Server::builder().addr("").listener(listener));
    let addr = server.serve().await.unwrap();
    assert_eq!(addr, bound);
    server.shutdown(Duration::from_secs(5)).await.unwrap();

    // The listener was consumed and no address is configured.
    assert!(matches!(server.serve().await, Err(ServerError::Listener(_))));
}

#[tokio::test]
async fn missing_address_fails_to_serve() {
    let server = Server::builder().addr("").build().unwrap();
    assert!(matches!(server.serve().await, Err(ServerError::Listener(_))));
}

#[tokio::test]
#[should_panic(expected = "server already shut down")]
async fn shutdown_without_serve_panics() {
    let server = Server::builder().addr("127.0.0.1:0").build().unwrap();
    let _ = server.shutdown(Duration::from_secs(1)).await;
}
