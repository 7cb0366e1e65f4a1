//! passcrow-serverd - escrow server for passcrow's recovery protocol.
//!
//! Exposes the five RPCs at `/passcrow/{policy,escrowrequest,verificationrequest,
//! recoveryrequest,deletionrequest}` over HTTP, backed by an embedded `sled`
//! database. Identity delivery (actually sending a verification code by
//! e-mail or SMS) is out of scope (§1) - this binary logs codes instead of
//! delivering them, which is enough for development and for operators who
//! wire their own delivery sidecar in front of it.
//!
//! data stored in ~/.passcrow-serverd/ by default.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use passcrow_hashcash::{FreePayment, HashcashPayment, PaymentRegistry};
use passcrow_proto::{Identity, IdentityRegistry, PolicyObject};
use passcrow_server::{IdentityHandler, PasscrowServer, ServerConfig};
use passcrow_storage::{SledStorage, Storage};

/// passcrow-serverd - recovery-share escrow server
#[derive(Parser)]
#[command(name = "passcrow-serverd")]
#[command(about = "Escrow server for passcrow's password/passphrase recovery protocol")]
#[command(version)]
struct Args {
    /// port to listen on
    #[arg(short, long, default_value = "4433")]
    port: u16,

    /// bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// data directory (default: ~/.passcrow-serverd)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// prometheus metrics port (default: api port + 1000)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// ISO country code advertised in the policy object
    #[arg(long, default_value = "??")]
    country_code: String,

    /// "about" URL advertised in the policy object
    #[arg(long, default_value = "https://passcrow.org/")]
    about_url: String,

    /// maximum accepted request body size, in bytes
    #[arg(long, default_value_t = passcrow_server::DEFAULT_MAX_REQUEST_BYTES)]
    max_request_bytes: usize,

    /// cap on any escrow row's lifetime, in days
    #[arg(long, default_value = "3660")]
    max_expiration_days: u64,

    /// cap on how long a verification round holds a decrypted share, in minutes
    #[arg(long, default_value = "30")]
    max_timeout_minutes: u64,

    /// seconds between expiration sweeps of the escrow/vcodes/rlimit tables
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// free scheme's granted escrow duration, in hours
    #[arg(long, default_value = "25")]
    free_hours: u64,

    /// whether a successful recovery consumes its verification code (§9
    /// open question; default matches the reference implementation, which
    /// leaves it unconsumed so a crashed client can retry)
    #[arg(long, default_value_t = false)]
    consume_vcode_on_success: bool,
}

/// Logs a vcode instead of delivering it. Real delivery (SMTP, SMS
/// gateways, ...) is an external collaborator this binary doesn't provide
/// (§1 Non-goals) - an operator who needs real delivery swaps this handler
/// out via `passcrow-server`'s `IdentityHandler` trait.
struct LoggingHandler {
    kind: String,
}

impl IdentityHandler for LoggingHandler {
    fn send_code(
        &self,
        identity: &Identity,
        description: &str,
        vcode: &str,
        timeout_seconds: u64,
    ) -> Result<(), String> {
        info!(
            kind = %self.kind,
            identity = identity.as_str(),
            vcode,
            timeout_seconds,
            description,
            "verification code ready for out-of-band delivery"
        );
        Ok(())
    }
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn caller_id(addr: SocketAddr) -> Vec<u8> {
    addr.ip().to_string().into_bytes()
}

async fn handle_policy(State(server): State<Arc<PasscrowServer>>) -> Json<PolicyObject> {
    counter!("passcrowd_requests_total", "endpoint" => "policy").increment(1);
    Json(server.policy())
}

macro_rules! rpc_handler {
    ($name:ident, $method:ident, $endpoint:literal) => {
        async fn $name(
            State(server): State<Arc<PasscrowServer>>,
            ConnectInfo(addr): ConnectInfo<SocketAddr>,
            body: axum::body::Bytes,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let start = Instant::now();
            counter!("passcrowd_requests_total", "endpoint" => $endpoint).increment(1);
            let resp = server.$method(&caller_id(addr), now(), &body);
            histogram!("passcrowd_request_duration_seconds", "endpoint" => $endpoint)
                .record(start.elapsed().as_secs_f64());
            let value = serde_json::to_value(&resp).unwrap_or(serde_json::json!({"error": "internal error"}));
            if value.get("error").and_then(|e| e.as_str()).is_some() {
                counter!("passcrowd_errors_total", "endpoint" => $endpoint).increment(1);
            }
            (StatusCode::OK, Json(value))
        }
    };
}

rpc_handler!(handle_escrow, escrow, "escrow");
rpc_handler!(handle_verification, verification, "verification");
rpc_handler!(handle_recovery, recovery, "recovery");
rpc_handler!(handle_deletion, deletion, "deletion");

async fn health() -> &'static str {
    "ok"
}

fn build_server(args: &Args, data_dir: &str) -> anyhow::Result<PasscrowServer> {
    let db_path = format!("{data_dir}/db");
    let storage: Arc<dyn Storage> = Arc::new(SledStorage::open(&db_path)?);

    let identities = IdentityRegistry::with_defaults();

    let mut handlers: HashMap<String, Arc<dyn IdentityHandler>> = HashMap::new();
    for kind in identities.sorted_kinds() {
        let handler: Arc<dyn IdentityHandler> = Arc::new(LoggingHandler { kind: kind.clone() });
        handlers.insert(kind, handler);
    }

    let payments = PaymentRegistry::new(vec![
        Box::new(FreePayment {
            expiration_seconds: args.free_hours * 3600,
        }),
        Box::new(HashcashPayment {
            bits: 11,
            expiration_seconds: 183 * 86400,
            maxtime: Duration::from_secs(90),
        }),
        Box::new(HashcashPayment {
            bits: 15,
            expiration_seconds: 10 * 366 * 86400,
            maxtime: Duration::from_secs(90),
        }),
    ]);

    let config = ServerConfig {
        country_code: args.country_code.clone(),
        about_url: args.about_url.clone(),
        max_expiration_seconds: args.max_expiration_days * 86400,
        max_timeout_seconds: args.max_timeout_minutes * 60,
        max_request_bytes: args.max_request_bytes,
        consume_vcode_on_success: args.consume_vcode_on_success,
    };

    Ok(PasscrowServer::new(storage, identities, handlers, payments, config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passcrow_serverd=info".into()),
        )
        .init();

    let args = Args::parse();

    let metrics_port = args.metrics_port.unwrap_or(args.port + 1000);
    let metrics_addr: SocketAddr = format!("{}:{}", args.bind, metrics_port).parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus metrics exporter: {e}"))?;

    let data_dir = args.data_dir.clone().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        format!("{home}/.passcrow-serverd")
    });
    std::fs::create_dir_all(&data_dir)?;

    let server = Arc::new(build_server(&args, &data_dir)?);

    info!("passcrow-serverd v{}", env!("CARGO_PKG_VERSION"));
    info!("  data: {}", data_dir);
    info!("  bind: {}:{}", args.bind, args.port);
    info!("  metrics: {}:{}", args.bind, metrics_port);
    info!("  kinds: {:?}", server.policy().kinds);

    let sweep_server = server.clone();
    let sweep_interval = Duration::from_secs(args.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            match sweep_server.expire_all(now()) {
                Ok(n) if n > 0 => info!(removed = n, "expired rows swept"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "expiration sweep failed"),
            }
        }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/passcrow/policy", get(handle_policy).post(handle_policy))
        .route("/passcrow/escrowrequest", post(handle_escrow))
        .route("/passcrow/verificationrequest", post(handle_verification))
        .route("/passcrow/recoveryrequest", post(handle_recovery))
        .route("/passcrow/deletionrequest", post(handle_deletion))
        .layer(CorsLayer::permissive())
        .with_state(server);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
