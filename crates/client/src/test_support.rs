//! In-process axum server for exercising the REST layer in tests.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    /// Path plus query string, e.g. `/admin/users?page=1&limit=10`.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct Canned {
    routes: Arc<Vec<(String, StatusCode, String)>>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub(crate) struct TestServer {
    pub base_url: String,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().await.clone()
    }
}

/// Answer every request with the same status and JSON body.
pub(crate) async fn serve(status: u16, body: &str) -> TestServer {
    serve_routes(vec![("", status, body)]).await
}

/// Answer requests by exact path; an empty path matches anything.
pub(crate) async fn serve_routes(routes: Vec<(&str, u16, &str)>) -> TestServer {
    let routes = routes
        .into_iter()
        .map(|(path, status, body)| {
            let status = StatusCode::from_u16(status).unwrap();
            (path.to_string(), status, body.to_string())
        })
        .collect();
    let log = Arc::new(Mutex::new(Vec::new()));
    let state = Canned {
        routes: Arc::new(routes),
        log: log.clone(),
    };

    let app = Router::new().fallback(respond).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { base_url, log }
}

async fn respond(
    State(canned): State<Canned>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let (status, reply) = canned
        .routes
        .iter()
        .find(|(path, _, _)| path.is_empty() || path == uri.path())
        .map(|(_, status, reply)| (*status, reply.clone()))
        .unwrap_or((StatusCode::NOT_FOUND, "{}".to_string()));

    canned.log.lock().await.push(RecordedRequest {
        method,
        uri: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers,
        body,
    });

    (status, [(header::CONTENT_TYPE, "application/json")], reply)
}
