// File: src/web_server.rs
// Web server with dashboard, JSON API and WebSocket view stream

use anyhow::Result;
use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post, Router},
    Json,
};
use futures::{sink::SinkExt, stream::StreamExt, Sink};
use serde::Deserialize;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::data_models::WebSocketMessage;
use crate::error::SyncError;
use crate::sync::{SyncHandle, ViewModel};

/// Body of `POST /api/select`
#[derive(Deserialize)]
struct SelectRequest {
    hash: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sync: SyncHandle,
}

/// Build the router; split out so tests can drive it without a socket
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(dashboard_html))
        .route("/api/view", get(get_view))
        .route("/api/select", post(select_block))
        .route("/api/refresh", post(refresh))
        .route("/ws", get(websocket_handler))
        .with_state(state);

    // Add CORS if enabled
    if enable_cors {
        app = app.layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any),
            ),
        );
    }
    app
}

/// Serve the dashboard until Ctrl-C
pub async fn run_web_mode(
    sync: SyncHandle,
    bind: &str,
    port: u16,
    enable_cors: bool,
) -> Result<()> {
    let app = router(AppState { sync }, enable_cors);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;

    println!("🌐 Web dashboard available at: http://{}", addr);
    println!("🔌 WebSocket endpoint: ws://{}/ws", addr);
    println!("📊 API endpoints:");
    println!("   GET  /api/view    - Current view model");
    println!("   POST /api/select  - Select a block {{\"hash\": \"...\"}}");
    println!("   POST /api/refresh - Poll upstream now");

    // Start the server using axum 0.7 API
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl-C handler: {}", err);
        std::future::pending::<()>().await;
    }
    println!("\n🛑 Shutting down web server");
}

/// Error surfaced to HTTP clients
struct ApiError(SyncError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SyncError::InvalidSelection(_) => StatusCode::BAD_REQUEST,
            SyncError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = WebSocketMessage::Error {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Serve the main dashboard HTML page
async fn dashboard_html() -> Html<&'static str> {
    Html(include_str!("dashboard.html"))
}

/// Current view model via REST API
async fn get_view(State(state): State<AppState>) -> Json<ViewModel> {
    Json(state.sync.snapshot())
}

async fn select_block(
    State(state): State<AppState>,
    Json(request): Json<SelectRequest>,
) -> Result<StatusCode, ApiError> {
    state.sync.select_block(&request.hash).map_err(ApiError)?;
    Ok(StatusCode::ACCEPTED)
}

async fn refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sync.refresh().map_err(ApiError)?;
    Ok(StatusCode::ACCEPTED)
}

/// WebSocket connection handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

fn view_message(view: ViewModel) -> WebSocketMessage {
    WebSocketMessage::View { data: Box::new(view) }
}

/// Push every published view to the client and apply its requests
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.sync.subscribe();

    // Send the current view first
    let initial = view_message(updates.borrow_and_update().clone());
    if send_json(&mut sender, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let message = view_message(updates.borrow_and_update().clone());
                if send_json(&mut sender, &message).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        let response = match serde_json::from_str::<WebSocketMessage>(&text) {
                            Ok(request) => handle_websocket_message(request, &state),
                            Err(err) => Some(WebSocketMessage::Error {
                                message: format!("Invalid message: {}", err),
                            }),
                        };
                        if let Some(response) = response {
                            if send_json(&mut sender, &response).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
    debug!("WebSocket client disconnected");
}

async fn send_json<S>(sender: &mut S, message: &WebSocketMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

/// Handle one client request. Selection and refresh results arrive
/// through the view stream, so they only answer on failure.
fn handle_websocket_message(message: WebSocketMessage, state: &AppState) -> Option<WebSocketMessage> {
    let outcome = match message {
        WebSocketMessage::GetView => return Some(view_message(state.sync.snapshot())),
        WebSocketMessage::SelectBlock { hash } => state.sync.select_block(&hash),
        WebSocketMessage::Refresh => state.sync.refresh(),
        WebSocketMessage::Ping => return Some(WebSocketMessage::Pong),
        _ => {
            return Some(WebSocketMessage::Error {
                message: "Unsupported message type".to_string(),
            })
        }
    };

    outcome.err().map(|err| WebSocketMessage::Error {
        message: err.to_string(),
    })
}
