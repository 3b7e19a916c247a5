//! # Auth Gateway - Identity Provider Service
//!
//! The headless IdP serving multiple independent product backends.
//! Products collect credentials in their own UIs, proxy them here, and
//! get back tokens, introspection and change events.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Transport Adapters (api/, grpc/)                   │
//! │        REST (actix-web)        gRPC (tonic, same services)      │
//! └───────────────┬─────────────────────────────┬───────────────────┘
//!                 ▼                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Policy Gate (policy/)                       │
//! │   credential → application cross-check → method/scope →         │
//! │   IP filters → rate limits                                      │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Service Layer (service/)                     │
//! │  AuthService · IdentityService · SessionService · OtpService    │
//! │  OauthLoginService · OidcProviderService · SamlService          │
//! │  WebhookService (event bus, background dispatcher)              │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Repository Layer (repository/) - sqlx                │
//! │            + ephemeral store (Redis, TTL/counters)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Background Work
//!
//! One leader instance runs the webhook dispatcher and the hourly
//! housekeeping sweep (expired sessions and OTP rows). Extra instances
//! are harmless - the dispatcher's claim is `SKIP LOCKED` - but wasteful.
//!
//! ## Configuration
//!
//! Environment variables via [`shared::config::AppConfig`]; the
//! important ones:
//!
//! - `DATABASE_URL`, `REDIS_URL`
//! - `SIGNING_KEY_DIR` - PEM keypairs; generated at boot when empty
//! - `PUBLIC_URL` - external base URL for discovery/SAML/OAuth callbacks
//! - `APP_GRPC__PORT` - tonic listener (default 50051)

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use shared::auth::jwt::TokenService;
use shared::auth::password::{PasswordHasher, PasswordPolicy};
use shared::config::AppConfig;
use shared::crypto::keys::{KeyAlgorithm, KeyManager, SigningKey};
use shared::{database, redis_client::RedisClient, tracing_config};
use std::sync::Arc;
use tracing::{info, warn};

mod api;
mod domain;
mod grpc;
mod policy;
mod repository;
mod service;

use api::routes;
use policy::PolicyGate;
use repository::{
    ApplicationRepository, AuditRepository, OAuthRepository, OtpRepository, RoleRepository,
    SessionRepository, SsoRepository, UserRepository, WebhookRepository,
};
use service::notifier::{DevLogNotifier, EmailSender, SmsSender};
use service::{
    AuthService, IdentityService, OauthLoginService, OidcProviderService, OtpService, SamlService,
    SessionService, WebhookService,
};

/// Shared application state, injected into REST handlers via
/// `web::Data` and into the gRPC service via `Arc`.
pub struct AppState {
    pub config: AppConfig,
    pub gate: Arc<PolicyGate>,
    pub auth: Arc<AuthService>,
    pub identity: Arc<IdentityService>,
    pub sessions: Arc<SessionService>,
    pub oauth_login: Arc<OauthLoginService>,
    pub oidc: Arc<OidcProviderService>,
    pub saml: Arc<SamlService>,
    pub tokens: Arc<TokenService>,
    pub applications: ApplicationRepository,
    pub roles: RoleRepository,
    pub webhooks_repo: WebhookRepository,
    pub oauth_repo: OAuthRepository,
    pub sso_repo: SsoRepository,
    pub audit: AuditRepository,
    pub email: Arc<dyn EmailSender>,
}

/// Loads signing keys from the configured directory, or generates one.
///
/// Every `<kid>.pem` under `key_dir` is loaded; `current_kid` selects
/// the signer. An empty directory bootstraps a fresh keypair of the
/// configured algorithm (fine for development; production mounts keys).
fn build_key_manager(config: &AppConfig) -> anyhow::Result<KeyManager> {
    let algorithm = KeyAlgorithm::parse(&config.keys.algorithm)?;

    if config.keys.key_dir.is_empty() {
        warn!("No SIGNING_KEY_DIR configured; generating an ephemeral signing key");
        return Ok(KeyManager::bootstrap(algorithm)?);
    }

    let mut keys = Vec::new();
    for entry in std::fs::read_dir(&config.keys.key_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pem") {
            continue;
        }

        let kid = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let pem = std::fs::read_to_string(&path)?;
        keys.push(SigningKey::from_pem(kid, &pem)?);
    }

    if keys.is_empty() {
        warn!(
            key_dir = %config.keys.key_dir,
            "Key directory is empty; generating an ephemeral signing key"
        );
        return Ok(KeyManager::bootstrap(algorithm)?);
    }

    info!(loaded = keys.len(), "Signing keys loaded");
    Ok(KeyManager::from_loaded(keys, &config.keys.current_kid)?)
}

/// Hourly sweep of expired sessions and OTP rows.
async fn run_housekeeping(sessions: SessionRepository, otps: OtpRepository) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));

    loop {
        ticker.tick().await;

        match sessions.delete_expired().await {
            Ok(n) if n > 0 => info!(deleted = n, "Expired sessions swept"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Session sweep failed"),
        }

        match otps.delete_expired().await {
            Ok(n) if n > 0 => info!(deleted = n, "Expired OTPs swept"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "OTP sweep failed"),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration & observability
    // ─────────────────────────────────────────────────────────────────────
    let config = AppConfig::from_env()?;
    tracing_config::init_tracing(&config.service_name, config.is_production());

    info!(
        service = %config.service_name,
        http = format!("{}:{}", config.server.host, config.server.port),
        grpc = format!("{}:{}", config.grpc.host, config.grpc.port),
        "Starting identity provider"
    );

    // ─────────────────────────────────────────────────────────────────────
    // Storage
    // ─────────────────────────────────────────────────────────────────────
    let db_pool = database::create_pool(&config.database).await?;
    let redis = RedisClient::new(&config.redis).await?;

    // ─────────────────────────────────────────────────────────────────────
    // Crypto & token engine
    // ─────────────────────────────────────────────────────────────────────
    let key_manager = Arc::new(build_key_manager(&config)?);
    let tokens = Arc::new(TokenService::new(key_manager.clone(), config.tokens.clone()));

    // ─────────────────────────────────────────────────────────────────────
    // Repositories
    // ─────────────────────────────────────────────────────────────────────
    let users_repo = UserRepository::new(db_pool.clone());
    let applications_repo = ApplicationRepository::new(db_pool.clone());
    let sessions_repo = SessionRepository::new(db_pool.clone());
    let roles_repo = RoleRepository::new(db_pool.clone());
    let otps_repo = OtpRepository::new(db_pool.clone());
    let oauth_repo = OAuthRepository::new(db_pool.clone());
    let sso_repo = SsoRepository::new(db_pool.clone());
    let webhooks_repo = WebhookRepository::new(db_pool.clone());
    let audit_repo = AuditRepository::new(db_pool.clone());

    // ─────────────────────────────────────────────────────────────────────
    // Services
    // ─────────────────────────────────────────────────────────────────────
    // Delivery capabilities: dev log sink unless a concrete driver is
    // wired in deployment
    let email: Arc<dyn EmailSender> = Arc::new(DevLogNotifier);
    let sms: Arc<dyn SmsSender> = Arc::new(DevLogNotifier);

    let webhooks = Arc::new(WebhookService::new(
        webhooks_repo.clone(),
        users_repo.clone(),
        config.webhooks.clone(),
    ));

    let identity = Arc::new(IdentityService::new(
        users_repo.clone(),
        roles_repo.clone(),
        redis.clone(),
        webhooks.clone(),
    ));

    let sessions = Arc::new(SessionService::new(
        sessions_repo.clone(),
        applications_repo.clone(),
        redis.clone(),
        identity.clone(),
        tokens.clone(),
        webhooks.clone(),
    ));

    let otp = Arc::new(OtpService::new(
        otps_repo.clone(),
        redis.clone(),
        email.clone(),
        sms,
        config.otp.clone(),
    ));

    let hasher = Arc::new(PasswordHasher::new());

    let auth = Arc::new(AuthService::new(
        identity.clone(),
        sessions.clone(),
        otp,
        tokens.clone(),
        hasher,
        PasswordPolicy::default(),
        redis.clone(),
        webhooks.clone(),
        audit_repo.clone(),
        applications_repo.clone(),
        sso_repo.clone(),
        config.lockout.clone(),
    ));

    let oauth_login = Arc::new(OauthLoginService::new(
        &config.oauth_providers,
        redis.clone(),
        identity.clone(),
        sessions.clone(),
        applications_repo.clone(),
        audit_repo.clone(),
        config.server.public_url.clone(),
    ));

    let oidc = Arc::new(OidcProviderService::new(
        oauth_repo.clone(),
        identity.clone(),
        tokens.clone(),
        redis.clone(),
        config.server.public_url.clone(),
    ));

    let saml = Arc::new(SamlService::new(
        sso_repo.clone(),
        sessions.clone(),
        key_manager.clone(),
        redis.clone(),
        config.server.public_url.clone(),
        config.tokens.issuer.clone(),
    ));

    let gate = Arc::new(PolicyGate::new(
        tokens.clone(),
        sessions.clone(),
        applications_repo.clone(),
        redis.clone(),
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        gate,
        auth,
        identity,
        sessions,
        oauth_login,
        oidc,
        saml,
        tokens,
        applications: applications_repo,
        roles: roles_repo,
        webhooks_repo,
        oauth_repo,
        sso_repo,
        audit: audit_repo,
        email,
    });

    // ─────────────────────────────────────────────────────────────────────
    // Background workers (leader only)
    // ─────────────────────────────────────────────────────────────────────
    tokio::spawn(webhooks.clone().run_dispatcher());
    tokio::spawn(run_housekeeping(sessions_repo, otps_repo));

    // ─────────────────────────────────────────────────────────────────────
    // gRPC listener
    // ─────────────────────────────────────────────────────────────────────
    let grpc_addr: std::net::SocketAddr =
        format!("{}:{}", config.grpc.host, config.grpc.port).parse()?;
    let grpc_service = grpc::GrpcAuthService::new(app_state.clone()).into_server();

    tokio::spawn(async move {
        info!(addr = %grpc_addr, "gRPC listener starting");
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(grpc_service)
            .serve(grpc_addr)
            .await
        {
            tracing::error!(error = %e, "gRPC server exited");
        }
    });

    // ─────────────────────────────────────────────────────────────────────
    // HTTP server
    // ─────────────────────────────────────────────────────────────────────
    let server_host = config.server.host.clone();
    let server_port = config.server.port;
    let workers = config.server.workers;

    let web_state = web::Data::from(app_state);
    let db_pool = web::Data::new(db_pool);

    info!("HTTP listener on {}:{}", server_host, server_port);

    let mut server = HttpServer::new(move || {
        // Product backends call server-to-server; CORS stays permissive
        // because browsers never talk to the IdP directly
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web_state.clone())
            .app_data(db_pool.clone())
            .configure(routes::configure)
    })
    .bind((server_host, server_port))?;

    if workers > 0 {
        server = server.workers(workers);
    }

    server.run().await?;

    Ok(())
}
