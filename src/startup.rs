use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;

use crate::auth::TokenCodec;
use crate::configuration::Settings;
use crate::identity::{
    CredentialService, FederatedProvider, HttpFederatedProvider, IdentityStore,
    PostgresIdentityStore,
};
use crate::middleware::{AdminGate, AuthGate};
use crate::routes::{current_user, health_check, list_users, login, logout, register};
use crate::session::{
    PostgresRevocationLog, RedisSessionRegistry, RevocationStore, SessionRegistry,
};
use crate::verification::{RedisVerificationStore, VerificationStore};

/// Explicit service context: every store handle and policy flag the
/// request path needs, constructed once at startup and passed by
/// reference. Nothing in request-handling code reaches for a process-wide
/// global.
pub struct AppState {
    pub identities: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub revocations: Arc<RevocationStore>,
    pub verifications: Arc<dyn VerificationStore>,
    pub federated: Option<Arc<dyn FederatedProvider>>,
    pub credentials: Arc<CredentialService>,
    pub codec: TokenCodec,
    pub store_timeout: Duration,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionRegistry>,
        revocations: Arc<RevocationStore>,
        verifications: Arc<dyn VerificationStore>,
        federated: Option<Arc<dyn FederatedProvider>>,
        codec: TokenCodec,
        single_session: bool,
        store_timeout: Duration,
    ) -> Self {
        let credentials = Arc::new(CredentialService::new(
            identities.clone(),
            sessions.clone(),
            revocations.clone(),
            codec.clone(),
            single_session,
            store_timeout,
        ));
        Self {
            identities,
            sessions,
            revocations,
            verifications,
            federated,
            credentials,
            codec,
            store_timeout,
        }
    }
}

fn io_error(kind: std::io::ErrorKind, message: String) -> std::io::Error {
    std::io::Error::new(kind, message)
}

/// Connect every store, rebuild the revocation cache and start serving.
/// The cache load happens strictly before the listener starts accepting:
/// a service that cannot prove which tokens are revoked must not serve.
pub async fn build(settings: Settings) -> Result<Server, std::io::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database.connection_string())
        .await
        .map_err(|e| {
            io_error(
                std::io::ErrorKind::ConnectionRefused,
                format!("database connection failed: {}", e),
            )
        })?;
    tracing::info!("database connection pool created");

    let redis_client = redis::Client::open(settings.redis.url.as_str()).map_err(|e| {
        io_error(
            std::io::ErrorKind::InvalidInput,
            format!("invalid redis url: {}", e),
        )
    })?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .map_err(|e| {
            io_error(
                std::io::ErrorKind::ConnectionRefused,
                format!("redis connection failed: {}", e),
            )
        })?;
    tracing::info!("redis connection established");

    let identities: Arc<dyn IdentityStore> = Arc::new(PostgresIdentityStore::new(pool.clone()));
    let sessions: Arc<dyn SessionRegistry> =
        Arc::new(RedisSessionRegistry::new(redis_conn.clone()));
    let revocations = Arc::new(RevocationStore::new(Arc::new(PostgresRevocationLog::new(
        pool,
    ))));
    let verifications: Arc<dyn VerificationStore> =
        Arc::new(RedisVerificationStore::new(redis_conn));
    let federated: Option<Arc<dyn FederatedProvider>> = settings
        .federated
        .clone()
        .map(|federated_settings| {
            Arc::new(HttpFederatedProvider::new(federated_settings)) as Arc<dyn FederatedProvider>
        });

    // Fatal on failure: serving with an empty cache would silently
    // un-revoke every previously blacklisted token.
    let loaded = revocations.load_all().await.map_err(|e| {
        io_error(
            std::io::ErrorKind::Other,
            format!("revocation cache load failed: {}", e),
        )
    })?;
    tracing::info!(entries = loaded, "revocation cache loaded");

    let state = AppState::new(
        identities,
        sessions,
        revocations,
        verifications,
        federated,
        TokenCodec::new(&settings.jwt),
        settings.system.single_session,
        settings.system.store_timeout,
    );

    let address = format!(
        "{}:{}",
        settings.application.host, settings.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!(address = %address, "server listening");

    run(listener, state)
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/user/register", web::post().to(register))
            .route("/user/login", web::post().to(login))
            // Protected routes
            .service(
                web::scope("/user")
                    .wrap(AuthGate)
                    .route("/logout", web::post().to(logout))
                    .route("/info", web::get().to(current_user)),
            )
            // Admin routes; the auth gate runs first, then the capability
            // check (wraps apply innermost-first).
            .service(
                web::scope("/admin")
                    .wrap(AdminGate)
                    .wrap(AuthGate)
                    .route("/users", web::get().to(list_users)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
