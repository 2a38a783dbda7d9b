//! Local HTTP server answering every request the same way.

use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use url::Url;

/// Serves `status` with `body` on a free local port and returns the base URL.
pub async fn serve(status: StatusCode, body: &'static str) -> Url {
    let app = Router::new().fallback(move || async move { (status, body) });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Url::parse(&format!("http://{addr}/")).unwrap()
}
