//! Mesh peer binary entry point
//!
//! Joins (optionally creating) a room on a signaling relay, logs session events and
//! broadcasts each line read from stdin to every connected peer.
//!
//! # Usage
//!
//! ```bash
//! # Join an existing room
//! cargo run --bin mesh_peer -- \
//!   --signaling-url ws://localhost:8080 \
//!   --namespace whiteboard \
//!   --room lobby
//!
//! # Create a hidden, password-protected room
//! cargo run --bin mesh_peer -- \
//!   --room secret --create --hidden --password hunter2
//!
//! # Configure STUN/TURN servers
//! cargo run --bin mesh_peer -- \
//!   --room lobby \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --turn-servers turn:turn.example.com:3478:user:pass
//! ```

use clap::Parser;
use remotemedia_mesh::{
    DataChannelMode, MeshConfig, MeshSession, Payload, RtcPeerConnector, SessionEvent,
    TurnServerConfig, WebSocketSignaling,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RemoteMedia mesh peer
///
/// Full-mesh WebRTC participant driven from the command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling relay URL
    #[arg(long, default_value = "ws://localhost:8080", env = "MESH_SIGNALING_URL")]
    signaling_url: String,

    /// Application namespace on the relay
    #[arg(long, default_value = "default", env = "MESH_NAMESPACE")]
    namespace: String,

    /// Room to join
    #[arg(long, env = "MESH_ROOM")]
    room: String,

    /// Room password
    #[arg(long, env = "MESH_PASSWORD")]
    password: Option<String>,

    /// Create the room before joining it
    #[arg(long, default_value_t = false)]
    create: bool,

    /// Leave the created room out of relay room listings
    #[arg(long, default_value_t = false)]
    hidden: bool,

    /// Join timeout in seconds
    #[arg(long, default_value_t = 30, env = "MESH_JOIN_TIMEOUT")]
    join_timeout_secs: u64,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "MESH_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Configuration preset: low_latency, mobile_network
    #[arg(long, env = "MESH_PRESET")]
    preset: Option<ConfigPreset>,

    /// Data channel mode: reliable, unreliable
    #[arg(long, env = "MESH_DATA_CHANNEL_MODE")]
    data_channel_mode: Option<DataChannelModeArg>,
}

/// Configuration preset for quick setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ConfigPreset {
    /// Short join bound, unreliable data channel
    LowLatency,
    /// Long join bound, backup STUN server
    MobileNetwork,
}

/// Data channel mode CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DataChannelModeArg {
    Reliable,
    Unreliable,
}

impl From<DataChannelModeArg> for DataChannelMode {
    fn from(arg: DataChannelModeArg) -> Self {
        match arg {
            DataChannelModeArg::Reliable => DataChannelMode::Reliable,
            DataChannelModeArg::Unreliable => DataChannelMode::Unreliable,
        }
    }
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        // password may contain colons
        credential: parts[4..].join(":"),
    })
}

/// Build MeshConfig from CLI arguments
///
/// A preset supplies the starting values; explicit arguments override it.
fn build_config_from_args(args: &Args) -> Result<MeshConfig, Box<dyn std::error::Error>> {
    let mut config = match args.preset {
        Some(ConfigPreset::LowLatency) => {
            info!("Using low_latency preset");
            MeshConfig::low_latency_preset(&args.signaling_url)
        }
        Some(ConfigPreset::MobileNetwork) => {
            info!("Using mobile_network preset");
            MeshConfig::mobile_network_preset(&args.signaling_url)
        }
        None => MeshConfig {
            signaling_url: args.signaling_url.clone(),
            join_timeout: Duration::from_secs(args.join_timeout_secs),
            ..Default::default()
        },
    };

    config.namespace = args.namespace.clone();
    config.stun_servers = args.stun_servers.clone();
    if let Some(mode) = args.data_channel_mode {
        config.data_channel_mode = mode.into();
    }

    let mut turn_servers = Vec::new();
    for turn_str in &args.turn_servers {
        let turn_config = parse_turn_server(turn_str)
            .map_err(|e| format!("Failed to parse TURN server: {}", e))?;
        info!(
            "Adding TURN server: {} (user: {})",
            turn_config.url, turn_config.username
        );
        turn_servers.push(turn_config);
    }
    if !turn_servers.is_empty() {
        config.turn_servers = turn_servers;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, leaving room...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("mesh-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        room = %args.room,
        "RemoteMedia mesh peer starting"
    );

    let config = build_config_from_args(&args)?;
    info!(
        signaling_url = %config.signaling_url,
        namespace = %config.namespace,
        stun_servers = ?config.stun_servers,
        turn_servers = config.turn_servers.len(),
        data_channel_mode = ?config.data_channel_mode,
        "Configuration loaded"
    );

    let signaling = Arc::new(WebSocketSignaling::new(&config.namespace));
    let connector = Arc::new(RtcPeerConnector::new(&config));
    let session = match MeshSession::connect(config, signaling, connector).await {
        Ok(session) => session,
        Err(e) if e.is_config_error() => {
            error!("Refusing to start: {}", e);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    let mut events = session.subscribe();

    if args.create {
        session.create(&args.room, args.password.as_deref(), args.hidden)?;
    }
    match session.join(&args.room, args.password.as_deref()).await {
        Ok(()) => info!(
            room_count = ?session.room_count(),
            local_id = ?session.local_id(),
            "Joined room {}",
            args.room
        ),
        // peers that connect later still mesh with us
        Err(e) if e.is_retryable() => warn!(
            connected = session.status().connected,
            room_count = ?session.room_count(),
            "Mesh incomplete, staying in room {}: {}",
            args.room,
            e
        ),
        Err(e) => {
            session.destroy().await;
            return Err(e.into());
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shutdown_check = tokio::time::interval(Duration::from_millis(100));

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} session events", skipped),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    let sent = session.broadcast(Payload::Text(line)).await?;
                    info!("Broadcast to {} peers", sent);
                }
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = shutdown_check.tick() => {}
        }
    }

    info!("Shutting down mesh peer");
    session.destroy().await;
    info!("Mesh peer shut down");

    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::RoomCount(count) => info!("Room count: {}", count),
        SessionEvent::SocketId(id) => info!("Assigned id {}", id),
        SessionEvent::Connect(peer_id) => info!("Peer {} connected", peer_id),
        SessionEvent::Disconnect(peer_id) => info!("Peer {} disconnected", peer_id),
        SessionEvent::Data { peer_id, data } => match event.text() {
            Some(text) => info!("[{}] {}", peer_id, text),
            None => info!("[{}] {} bytes of binary data", peer_id, data.len()),
        },
        SessionEvent::Stream { peer_id, stream } => {
            info!("Peer {} started stream {}", peer_id, stream.id())
        }
        SessionEvent::Track { peer_id, track, .. } => {
            info!("Peer {} added {:?} track {}", peer_id, track.kind(), track.id())
        }
        SessionEvent::Error {
            peer_id,
            role,
            cause,
        } => warn!("Peer {} ({}) error: {}", peer_id, role, cause),
        SessionEvent::FullConnect => info!("Mesh fully connected"),
        SessionEvent::SignalingLost(reason) => warn!("Signaling lost: {}", reason),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
