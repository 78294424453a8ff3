//! Invite Ledger HTTP server.

use std::sync::Arc;

use dotenv::dotenv;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use invite_ledger::{
    router, AppConfig, AppState, InviteCodeGenerator, JwtVerifier, RedbUserStore, ReferralService, UserStore,
};

// ============================================================================
// GRACEFUL SHUTDOWN
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("🛑 Shutdown signal received");
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    dotenv().ok();

    // 1. Logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,invite_ledger=debug")))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .init();

    // 2. Config
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 3. Store (ReDB)
    let store: Arc<dyn UserStore> = match RedbUserStore::open(&config.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("❌ Failed to open store at {}: {}", config.data_dir.display(), e);
            std::process::exit(1);
        }
    };
    info!("💾 Store opened at {}", config.data_dir.display());

    // 4. Service + auth
    let generator = InviteCodeGenerator::new(config.invite.code_length, config.invite.max_attempts);
    let service = match ReferralService::new(store, generator, config.rewards) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("❌ Invalid referral configuration: {}", e);
            std::process::exit(1);
        }
    };
    let verifier = Arc::new(JwtVerifier::new(
        &config.auth.jwt_secret,
        config.auth.issuer.as_deref(),
        config.auth.audience.as_deref(),
    ));

    // 5. Router
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = router(AppState::new(service, verifier))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!("🚀 Invite Ledger listening on {}", config.bind_addr);
    info!("   GET  /api/users/invite/{{code}}    Invite lookup");
    info!("   POST /api/users/register          Pre-registration");
    info!("   POST /api/users/sync              Register or sync (bearer)");
    info!("   POST /api/users/referral          Link referral (bearer)");
    info!("   GET  /api/users/profile           Profile (bearer)");
    info!("   PUT  /api/users/wallet-address    Wallet address (bearer)");
    info!(
        referrer_bonus = config.rewards.referrer_bonus,
        referee_bonus = config.rewards.referee_bonus,
        "🎁 Referral rewards"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("✅ Server shutdown complete");
}
