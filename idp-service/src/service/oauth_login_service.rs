//! # OAuth Sign-In (IdP as consumer)
//!
//! Social sign-in through upstream providers. A product frontend hits
//! `GET /api/auth/{provider}`, follows the redirect, and the provider
//! calls back with a code we exchange for the user's identity.
//!
//! ## Flow
//!
//! ```text
//! start(provider, app)
//!   ├─ mint state nonce, park (state -> app) in Redis, TTL 5 min
//!   └─ 302 to the provider's authorize URL
//!
//! callback(provider, state, code)
//!   ├─ consume the state nonce (single-shot: GET+DEL)
//!   ├─ exchange the code, fetch the provider identity
//!   ├─ link or create the user by verified email
//!   └─ establish the session (method oauth_<provider>)
//! ```
//!
//! Telegram is the odd one out: its login widget sends signed fields
//! instead of an authorization code, verified with
//! `HMAC-SHA256(data_check_string, SHA256(bot_token))`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use shared::auth::jwt::TokenService;
use shared::config::{OauthProviderCredentials, OauthProvidersConfig};
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::Application;
use crate::repository::{ApplicationRepository, AuditRecord, AuditRepository};
use crate::service::identity_service::IdentityService;
use crate::service::session_service::{AuthOutcome, ClientContext, SessionService};

/// State nonces live this long between start and callback.
const STATE_TTL: Duration = Duration::from_secs(300);

/// What an upstream provider tells us about the signed-in user.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub provider: String,
    /// Provider-scoped stable subject id
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub username_hint: Option<String>,
}

/// One upstream OAuth provider driver.
#[async_trait]
pub trait OAuthLoginProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// The URL the browser is redirected to.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchanges the callback code and resolves the user identity.
    async fn exchange(&self, code: &str, redirect_uri: &str)
        -> Result<ProviderIdentity, ApiError>;
}

// =============================================================================
// PROVIDER DRIVERS
// =============================================================================

struct GoogleProvider {
    credentials: OauthProviderCredentials,
    http: reqwest::Client,
}

#[async_trait]
impl OAuthLoginProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://accounts.google.com/o/oauth2/v2/auth?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode("openid email profile"),
            urlencoding::encode(state),
        )
    }

    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderIdentity, ApiError> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(serde::Deserialize)]
        struct UserInfo {
            sub: String,
            email: Option<String>,
            #[serde(default)]
            email_verified: bool,
            name: Option<String>,
        }

        let token: TokenResponse = self
            .http
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|_| provider_down("google"))?
            .error_for_status()
            .map_err(|_| ApiError::InvalidCredentials)?
            .json()
            .await
            .map_err(|_| provider_down("google"))?;

        let info: UserInfo = self
            .http
            .get("https://openidconnect.googleapis.com/v1/userinfo")
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|_| provider_down("google"))?
            .json()
            .await
            .map_err(|_| provider_down("google"))?;

        Ok(ProviderIdentity {
            provider: "google".to_string(),
            subject: info.sub,
            email: info.email,
            email_verified: info.email_verified,
            username_hint: info.name,
        })
    }
}

struct GithubProvider {
    credentials: OauthProviderCredentials,
    http: reqwest::Client,
}

#[async_trait]
impl OAuthLoginProvider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode("read:user user:email"),
            urlencoding::encode(state),
        )
    }

    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderIdentity, ApiError> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(serde::Deserialize)]
        struct GithubUser {
            id: i64,
            login: String,
            email: Option<String>,
        }

        #[derive(serde::Deserialize)]
        struct GithubEmail {
            email: String,
            primary: bool,
            verified: bool,
        }

        let token: TokenResponse = self
            .http
            .post("https://github.com/login/oauth/access_token")
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|_| provider_down("github"))?
            .json()
            .await
            .map_err(|_| ApiError::InvalidCredentials)?;

        let user: GithubUser = self
            .http
            .get("https://api.github.com/user")
            .header("User-Agent", "auth-gateway")
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|_| provider_down("github"))?
            .json()
            .await
            .map_err(|_| provider_down("github"))?;

        // Profile email can be private; the emails endpoint has the
        // primary verified one
        let (email, email_verified) = match &user.email {
            Some(e) => (Some(e.clone()), true),
            None => {
                let emails: Vec<GithubEmail> = self
                    .http
                    .get("https://api.github.com/user/emails")
                    .header("User-Agent", "auth-gateway")
                    .bearer_auth(&token.access_token)
                    .send()
                    .await
                    .map_err(|_| provider_down("github"))?
                    .json()
                    .await
                    .unwrap_or_default();

                match emails.into_iter().find(|e| e.primary) {
                    Some(primary) => (Some(primary.email), primary.verified),
                    None => (None, false),
                }
            }
        };

        Ok(ProviderIdentity {
            provider: "github".to_string(),
            subject: user.id.to_string(),
            email,
            email_verified,
            username_hint: Some(user.login),
        })
    }
}

struct YandexProvider {
    credentials: OauthProviderCredentials,
    http: reqwest::Client,
}

#[async_trait]
impl OAuthLoginProvider for YandexProvider {
    fn name(&self) -> &'static str {
        "yandex"
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://oauth.yandex.ru/authorize?client_id={}&redirect_uri={}&response_type=code&state={}",
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
        )
    }

    async fn exchange(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<ProviderIdentity, ApiError> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(serde::Deserialize)]
        struct YandexInfo {
            id: String,
            login: Option<String>,
            default_email: Option<String>,
        }

        let token: TokenResponse = self
            .http
            .post("https://oauth.yandex.ru/token")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|_| provider_down("yandex"))?
            .error_for_status()
            .map_err(|_| ApiError::InvalidCredentials)?
            .json()
            .await
            .map_err(|_| provider_down("yandex"))?;

        let info: YandexInfo = self
            .http
            .get("https://login.yandex.ru/info?format=json")
            .header("Authorization", format!("OAuth {}", token.access_token))
            .send()
            .await
            .map_err(|_| provider_down("yandex"))?
            .json()
            .await
            .map_err(|_| provider_down("yandex"))?;

        Ok(ProviderIdentity {
            provider: "yandex".to_string(),
            subject: info.id,
            // Yandex emails are account-verified
            email_verified: info.default_email.is_some(),
            email: info.default_email,
            username_hint: info.login,
        })
    }
}

fn provider_down(name: &str) -> ApiError {
    ApiError::ProviderUnavailable {
        provider: name.to_string(),
    }
}

// =============================================================================
// TELEGRAM LOGIN VERIFICATION
// =============================================================================

/// Verifies Telegram login-widget fields.
///
/// `hash` must equal HMAC-SHA256 over the sorted `key=value` lines of
/// the remaining fields, keyed with SHA256(bot_token).
pub fn verify_telegram_login(
    fields: &BTreeMap<String, String>,
    bot_token: &str,
) -> Result<ProviderIdentity, ApiError> {
    type HmacSha256 = Hmac<Sha256>;

    let provided_hash = fields.get("hash").ok_or(ApiError::InvalidCredentials)?;

    let data_check_string = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let secret = Sha256::digest(bot_token.as_bytes());
    let mut mac = HmacSha256::new_from_slice(&secret).expect("HMAC accepts any key length");
    mac.update(data_check_string.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if &expected != provided_hash {
        return Err(ApiError::InvalidCredentials);
    }

    let id = fields.get("id").ok_or(ApiError::InvalidCredentials)?;

    Ok(ProviderIdentity {
        provider: "telegram".to_string(),
        subject: id.clone(),
        email: None,
        email_verified: false,
        username_hint: fields.get("username").cloned(),
    })
}

// =============================================================================
// SERVICE
// =============================================================================

/// Service for OAuth consumer sign-in.
pub struct OauthLoginService {
    providers: HashMap<&'static str, Arc<dyn OAuthLoginProvider>>,
    telegram_bot_token: Option<String>,
    redis: RedisClient,
    identity: Arc<IdentityService>,
    sessions: Arc<SessionService>,
    applications: ApplicationRepository,
    audit: AuditRepository,
    public_url: String,
}

impl OauthLoginService {
    pub fn new(
        config: &OauthProvidersConfig,
        redis: RedisClient,
        identity: Arc<IdentityService>,
        sessions: Arc<SessionService>,
        applications: ApplicationRepository,
        audit: AuditRepository,
        public_url: String,
    ) -> Self {
        let http = reqwest::Client::new();
        let mut providers: HashMap<&'static str, Arc<dyn OAuthLoginProvider>> = HashMap::new();

        if let Some(credentials) = config.google.clone() {
            providers.insert(
                "google",
                Arc::new(GoogleProvider {
                    credentials,
                    http: http.clone(),
                }),
            );
        }
        if let Some(credentials) = config.github.clone() {
            providers.insert(
                "github",
                Arc::new(GithubProvider {
                    credentials,
                    http: http.clone(),
                }),
            );
        }
        if let Some(credentials) = config.yandex.clone() {
            providers.insert(
                "yandex",
                Arc::new(YandexProvider {
                    credentials,
                    http,
                }),
            );
        }

        Self {
            providers,
            telegram_bot_token: config.telegram_bot_token.clone(),
            redis,
            identity,
            sessions,
            applications,
            audit,
            public_url,
        }
    }

    fn redirect_uri(&self, provider: &str) -> String {
        format!("{}/api/auth/{provider}/callback", self.public_url)
    }

    /// Starts the flow: parks the state nonce and returns the provider
    /// redirect URL.
    pub async fn start(
        &self,
        provider: &str,
        application: &Application,
    ) -> Result<String, ApiError> {
        let driver = self.providers.get(provider).ok_or_else(|| ApiError::NotFound {
            resource: format!("oauth provider:{provider}"),
        })?;

        let state = TokenService::new_opaque_token();
        self.redis
            .set(
                &format!("oauth:state:{state}"),
                &application.id,
                Some(STATE_TTL),
            )
            .await?;

        Ok(driver.authorize_url(&self.redirect_uri(provider), &state))
    }

    /// Callback leg: consume the state, exchange the code, link or
    /// create the user, establish the session.
    pub async fn callback(
        &self,
        provider: &str,
        state: &str,
        code: &str,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        let application = self.consume_state(state).await?;

        let driver = self.providers.get(provider).ok_or_else(|| ApiError::NotFound {
            resource: format!("oauth provider:{provider}"),
        })?;

        let identity = driver.exchange(code, &self.redirect_uri(provider)).await?;

        self.complete(identity, &application, device_id, client).await
    }

    /// Telegram login-widget leg: HMAC verification instead of a code
    /// exchange. The widget posts straight to the callback with its
    /// signed fields plus our state.
    pub async fn telegram_callback(
        &self,
        state: &str,
        fields: &BTreeMap<String, String>,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        let application = self.consume_state(state).await?;

        let bot_token = self
            .telegram_bot_token
            .as_deref()
            .ok_or_else(|| ApiError::NotFound {
                resource: "oauth provider:telegram".to_string(),
            })?;

        let identity = verify_telegram_login(fields, bot_token)?;

        self.complete(identity, &application, device_id, client).await
    }

    /// Single-shot state consumption: GET + DEL. A replayed or expired
    /// state never resolves.
    async fn consume_state(&self, state: &str) -> Result<Application, ApiError> {
        let key = format!("oauth:state:{state}");
        let app_id: Uuid = self
            .redis
            .get(&key)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;
        let _ = self.redis.delete(&key).await;

        self.applications
            .find_by_id(app_id)
            .await?
            .filter(|app| app.is_active)
            .ok_or(ApiError::InvalidCredentials)
    }

    async fn complete(
        &self,
        identity: ProviderIdentity,
        application: &Application,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        // Link by verified email. Identity unification across products
        // hangs off the email, so providers that withhold it can't sign
        // users in.
        let email = identity.email.as_deref().ok_or(ApiError::BadRequest {
            message: format!(
                "{} did not supply an email address for this account",
                identity.provider
            ),
        })?;

        let user = self
            .identity
            .find_or_create_by_email(email, identity.email_verified)
            .await?;

        self.identity.guard_profile(&user, application.id).await?;

        let method = format!("oauth_{}", identity.provider);
        let outcome = self
            .sessions
            .establish(&user, Some(application), device_id, client, &method)
            .await?;

        info!(
            user_id = %user.id,
            provider = %identity.provider,
            "OAuth sign-in completed"
        );

        self.audit
            .record(
                AuditRecord::success("auth.oauth_signin")
                    .user(user.id)
                    .application(Some(application.id))
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;

        Ok(outcome)
    }
}

impl std::fmt::Debug for OauthLoginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OauthLoginService")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram_fields(bot_token: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), "42424242".to_string());
        fields.insert("first_name".to_string(), "Test".to_string());
        fields.insert("username".to_string(), "testuser".to_string());
        fields.insert("auth_date".to_string(), "1700000000".to_string());

        // Compute the hash the widget would send
        let data_check_string = fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");
        let secret = Sha256::digest(bot_token.as_bytes());
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret).unwrap();
        mac.update(data_check_string.as_bytes());
        fields.insert("hash".to_string(), hex::encode(mac.finalize().into_bytes()));

        fields
    }

    #[test]
    fn test_telegram_login_verifies_valid_hash() {
        let fields = telegram_fields("123456:bot-token");
        let identity = verify_telegram_login(&fields, "123456:bot-token").unwrap();

        assert_eq!(identity.provider, "telegram");
        assert_eq!(identity.subject, "42424242");
        assert_eq!(identity.username_hint.as_deref(), Some("testuser"));
    }

    #[test]
    fn test_telegram_login_rejects_tampered_fields() {
        let mut fields = telegram_fields("123456:bot-token");
        fields.insert("id".to_string(), "999".to_string());

        assert!(matches!(
            verify_telegram_login(&fields, "123456:bot-token"),
            Err(ApiError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_telegram_login_rejects_wrong_bot_token() {
        let fields = telegram_fields("123456:bot-token");
        assert!(verify_telegram_login(&fields, "other-token").is_err());
    }

    #[test]
    fn test_authorize_urls_carry_state_and_redirect() {
        let google = GoogleProvider {
            credentials: OauthProviderCredentials {
                client_id: "cid".into(),
                client_secret: "secret".into(),
            },
            http: reqwest::Client::new(),
        };

        let url = google.authorize_url("https://idp.example.com/api/auth/google/callback", "st8");
        assert!(url.starts_with("https://accounts.google.com/"));
        assert!(url.contains("state=st8"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains(&urlencoding::encode(
            "https://idp.example.com/api/auth/google/callback"
        ).into_owned()));
    }
}
