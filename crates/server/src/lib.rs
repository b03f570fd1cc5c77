//! Florafield server: websocket sessions, interest management, and the
//! growth scheduler, on top of the engine's flower field.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use florafield_engine::{FlowerField, FlowerStore};
use florafield_protocol::{
    ClientMessage, FieldDelta, FlowerPacket, ServerMessage, ServerParameters, Vec2,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

pub mod scheduler;
pub mod session;

use session::{filter_delta, position_report, ViewerSession};

/// Capacity of the world-update fan-out channel. A viewer that lags this far
/// behind starts dropping updates and self-heals on its next position report.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub params: ServerParameters,
    pub field_width: f64,
    pub field_height: f64,
    /// Erase the store before serving.
    pub reset: bool,
    /// Plant this many random flowers at startup if set.
    pub seed: Option<usize>,
}

impl ServerConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            params: ServerParameters::default(),
            field_width: 1000.0,
            field_height: 1000.0,
            reset: false,
            seed: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    /// The single-writer lock around the combined index + store. Every
    /// composite mutation and every diff query runs inside it.
    pub field: Arc<Mutex<FlowerField>>,
    pub params: ServerParameters,
    pub updates: broadcast::Sender<FieldDelta>,
}

/// Open the store, rebuild the spatial index, and apply the reset/seed
/// bootstrap options.
pub fn init_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let store = FlowerStore::new(&config.db_path);
    let mut field = FlowerField::new(store, config.field_width, config.field_height);
    if config.reset {
        let wiped = field.erase()?;
        info!(flowers = wiped, "flower store erased");
    }
    let loaded = field.initialize()?;
    info!(
        flowers = loaded,
        db = %config.db_path.display(),
        "flower field initialized"
    );

    if let Some(n) = config.seed {
        let mut rng = SmallRng::from_entropy();
        let planted = seed_field(&mut field, &mut rng, n, config);
        info!(flowers = planted, "seeded random flowers");
    }

    let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
    Ok(AppState {
        field: Arc::new(Mutex::new(field)),
        params: config.params,
        updates,
    })
}

fn seed_field(field: &mut FlowerField, rng: &mut impl Rng, n: usize, config: &ServerConfig) -> usize {
    let hw = config.field_width / 2.0;
    let hh = config.field_height / 2.0;
    let mut planted = 0;
    for _ in 0..n {
        let packet = FlowerPacket {
            id: florafield_engine::new_flower_id(),
            location: Vec2::new(rng.gen_range(-hw..hw), rng.gen_range(-hh..hh)),
            genome: florafield_protocol::FlowerGenome::random(rng),
        };
        let delta = field.add_flowers(&[packet], config.params.flower_exclusion_range);
        planted += delta.added.len();
    }
    planted
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(Arc::new(state))
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any),
        )
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| viewer_connection(socket, state))
}

/// One viewer connection: config first, then position reports and plants in,
/// add/delete deltas out, until either side hangs up. Dropping the socket
/// tears down only this session.
async fn viewer_connection(mut socket: WebSocket, state: Arc<AppState>) {
    let mut updates = state.updates.subscribe();
    if send_message(&mut socket, &ServerMessage::Config(state.params))
        .await
        .is_err()
    {
        return;
    }
    let mut session = ViewerSession::default();
    info!("viewer connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => {
                            if handle_client_message(&state, &mut session, &mut socket, msg)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        // Malformed input is dropped; the connection stays open.
                        Err(err) => warn!(error = %err, "dropping malformed viewer message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(error = %err, "websocket receive error");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(delta) => {
                    let (adds, removes) = filter_delta(&mut session, state.params.flower_range, &delta);
                    if send_delta(&mut socket, adds, removes).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "viewer lagged behind world updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("viewer disconnected");
}

async fn handle_client_message(
    state: &AppState,
    session: &mut ViewerSession,
    socket: &mut WebSocket,
    msg: ClientMessage,
) -> Result<(), axum::Error> {
    match msg {
        ClientMessage::PositionUpdate(report) => {
            let outcome = {
                let field = state.field.lock().await;
                position_report(&field, session, &report, state.params.flower_range)
            };
            match outcome {
                Ok((adds, removes)) => send_delta(socket, adds, removes).await,
                Err(err) => {
                    // The viewer sees nothing; the next report recomputes the
                    // diff from scratch.
                    error!(error = %err, "position report failed");
                    Ok(())
                }
            }
        }
        ClientMessage::PlantFlower(packet) => {
            apply_plant(state, packet).await;
            Ok(())
        }
    }
}

/// Insert one viewer-planted flower and broadcast the resulting delta to all
/// viewers, the planter included.
pub(crate) async fn apply_plant(state: &AppState, packet: FlowerPacket) {
    let delta = {
        let mut field = state.field.lock().await;
        field.add_flowers(&[packet], state.params.flower_exclusion_range)
    };
    if !delta.is_empty() {
        let _ = state.updates.send(delta);
    }
}

async fn send_delta(
    socket: &mut WebSocket,
    adds: Vec<FlowerPacket>,
    removes: Vec<String>,
) -> Result<(), axum::Error> {
    // Empty sets are omitted rather than sent as empty lists.
    if !adds.is_empty() {
        send_message(socket, &ServerMessage::AddFlowers(adds)).await?;
    }
    if !removes.is_empty() {
        send_message(socket, &ServerMessage::DeleteFlowers(removes)).await?;
    }
    Ok(())
}

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(err) => {
            error!(error = %err, "failed to serialize server message");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}

pub async fn serve(addr: SocketAddr, config: ServerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    config: ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let state = init_state(&config)?;
    let growth = scheduler::spawn_growth_scheduler(state.clone());
    let app = build_router(state);
    let addr = listener.local_addr()?;
    info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    growth.abort();
    Ok(addr)
}
