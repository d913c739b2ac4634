// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use credit_gate::{
    api::router,
    auth::AdminTokenVerifier,
    config::{
        ADMIN_TOKEN_ENV, CREDITS_PER_BATCH_ENV, DATA_DIR_ENV, DB_FILENAME, DEFAULT_CREDITS_PER_BATCH,
        DEFAULT_GENERATION_COST, DEFAULT_HOST, DEFAULT_MINOR_UNITS_PER_BATCH, DEFAULT_PORT,
        DEV_MASTER_KEY_SECRET, GENERATION_COST_ENV, HOST_ENV, LOG_FORMAT_ENV,
        MASTER_KEY_SECRET_ENV, MINOR_UNITS_PER_BATCH_ENV, PORT_ENV,
    },
    credits::{CreditProcessor, CreditRate},
    gate::AccessGate,
    keys::{InMemoryKeyStore, KeyRegistry, KeyStore, RedbKeyStore},
    ledger::{InMemoryLedgerStore, Ledger, LedgerStore, RedbLedgerStore},
    ratelimit::{RateLimiter, Sweeper},
    state::AppState,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    match env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let secret = env::var(MASTER_KEY_SECRET_ENV).unwrap_or_else(|_| {
        tracing::warn!(
            "{MASTER_KEY_SECRET_ENV} is not set; using the development fallback secret. \
             Keys derived with it are worthless in production."
        );
        DEV_MASTER_KEY_SECRET.to_string()
    });

    // Storage: a single redb database shared by keys and ledger when
    // DATA_DIR is set, in-memory otherwise.
    let (key_store, ledger_store): (Arc<dyn KeyStore>, Arc<dyn LedgerStore>) =
        match env::var(DATA_DIR_ENV) {
            Ok(dir) => {
                let dir = PathBuf::from(dir);
                std::fs::create_dir_all(&dir).expect("failed to create data directory");
                let db = Arc::new(
                    redb::Database::create(dir.join(DB_FILENAME))
                        .expect("failed to open redb database"),
                );
                tracing::info!(path = %dir.join(DB_FILENAME).display(), "using redb storage");
                (
                    Arc::new(
                        RedbKeyStore::new(Arc::clone(&db)).expect("failed to init key table"),
                    ),
                    Arc::new(RedbLedgerStore::new(db).expect("failed to init ledger tables")),
                )
            }
            Err(_) => {
                tracing::warn!("{DATA_DIR_ENV} is not set; state is in-memory and lost on restart");
                (
                    Arc::new(InMemoryKeyStore::new()),
                    Arc::new(InMemoryLedgerStore::new()),
                )
            }
        };

    let registry = Arc::new(KeyRegistry::new(key_store, secret));
    let limiter = Arc::new(RateLimiter::new());
    let gate = Arc::new(AccessGate::new(Arc::clone(&registry), Arc::clone(&limiter)));

    let ledger = Ledger::new(ledger_store);
    let rate = CreditRate::new(
        env_u64(CREDITS_PER_BATCH_ENV, DEFAULT_CREDITS_PER_BATCH),
        env_u64(MINOR_UNITS_PER_BATCH_ENV, DEFAULT_MINOR_UNITS_PER_BATCH),
    )
    .expect("credit rate sides must be positive");
    let credits = Arc::new(CreditProcessor::new(ledger.clone(), rate));

    let admin = match env::var(ADMIN_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => Some(Arc::new(AdminTokenVerifier::new(&token))),
        _ => {
            tracing::warn!("{ADMIN_TOKEN_ENV} is not set; admin endpoints return 503");
            None
        }
    };

    let generation_cost = env_i64(GENERATION_COST_ENV, DEFAULT_GENERATION_COST).max(1);

    let state = AppState::new(gate, registry, credits, ledger, admin, generation_cost);
    let app = router(state);

    // Background sweep of expired rate limit records.
    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(limiter);
    tokio::spawn(sweeper.run(shutdown.clone()));

    let host = env::var(HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port: u16 = env::var(PORT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("failed to parse bind address");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listen address");
    tracing::info!("credit-gate listening on http://{addr} (docs at /docs)");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    })
    .await
    .expect("server failed");
}
