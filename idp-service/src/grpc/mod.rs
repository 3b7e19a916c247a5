//! # gRPC Transport Adapter
//!
//! The tonic `AuthService` exposing the same service layer as REST;
//! the differences are purely marshalling and metadata extraction.
//!
//! ## Authentication
//!
//! Every call authenticates via metadata: `x-api-key` (server-to-server)
//! or a bearer `authorization` token. Client context rides in
//! `x-application-id`, `x-device-id`, `x-forwarded-for` and
//! `user-agent`; all four fold into the same [`ClientContext`] the REST
//! adapter builds.
//!
//! A missing `x-device-id` means no session reuse: every such login
//! inserts a fresh session row - no synthesis.
//!
//! ## Scopes
//!
//! Each method requires one scope from the closed set; the table lives
//! inline at each handler. The bound application must also allow the
//! scope (`allowed_grpc_scopes`).

use std::sync::Arc;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use shared::auth::api_key::ApiScope;
use shared::errors::ApiError;

use crate::domain::{OtpType, User};
use crate::policy::{PolicyGate, RequestContext};
use crate::service::otp_service::OtpTarget;
use crate::service::session_service::ClientContext;
use crate::service::SigninResult;
use crate::AppState;

/// Generated protobuf/tonic types.
pub mod proto {
    tonic::include_proto!("authgate.v1");
}

use proto::auth_service_server::AuthService as AuthServiceGrpc;
pub use proto::auth_service_server::AuthServiceServer;

/// The tonic service implementation.
pub struct GrpcAuthService {
    state: Arc<AppState>,
}

impl GrpcAuthService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Builds the server wrapper for `tonic::transport::Server`.
    pub fn into_server(self) -> AuthServiceServer<Self> {
        AuthServiceServer::new(self)
    }

    // =========================================================================
    // METADATA EXTRACTION
    // =========================================================================

    fn meta_str(request: &Request<impl Sized>, key: &str) -> Option<String> {
        request
            .metadata()
            .get(key)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .filter(|v| !v.trim().is_empty())
    }

    fn client_context(request: &Request<impl Sized>) -> ClientContext {
        let ip_address = Self::meta_str(request, "x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .or_else(|| request.remote_addr().map(|a| a.ip().to_string()));

        ClientContext {
            ip_address,
            user_agent: Self::meta_str(request, "user-agent"),
        }
    }

    fn credential(request: &Request<impl Sized>) -> Option<String> {
        if let Some(key) = Self::meta_str(request, "x-api-key") {
            return Some(key);
        }

        Self::meta_str(request, "authorization")
            .map(|v| v.strip_prefix("Bearer ").map(String::from).unwrap_or(v))
    }

    fn stated_application(request: &Request<impl Sized>) -> Result<Option<Uuid>, Status> {
        match Self::meta_str(request, "x-application-id") {
            Some(raw) => Uuid::parse_str(raw.trim())
                .map(Some)
                .map_err(|_| Status::from(ApiError::InvalidUuid)),
            None => Ok(None),
        }
    }

    /// Runs the policy gate and the per-method scope check.
    async fn gate<T>(
        &self,
        request: &Request<T>,
        scope: ApiScope,
    ) -> Result<RequestContext, Status> {
        let credential = Self::credential(request);
        let stated = Self::stated_application(request)?;
        let client = Self::client_context(request);
        // No x-device-id -> no session reuse; never synthesized
        let device_id = Self::meta_str(request, "x-device-id");

        let ctx = self
            .state
            .gate
            .authenticate(credential.as_deref(), stated, &client, device_id)
            .await
            .map_err(Status::from)?;

        PolicyGate::require_scope(&ctx, scope).map_err(Status::from)?;

        Ok(ctx)
    }

    // =========================================================================
    // MARSHALLING HELPERS
    // =========================================================================

    fn user_response(user: &User) -> proto::UserResponse {
        proto::UserResponse {
            user_id: user.id.to_string(),
            email: user.email.clone().unwrap_or_default(),
            phone: user.phone.clone().unwrap_or_default(),
            username: user.username.clone(),
            is_active: user.is_active,
            email_verified: user.email_verified,
            phone_verified: user.phone_verified,
            two_factor_enabled: user.totp_secret.is_some(),
            created_at: user.created_at.timestamp(),
            updated_at: user.updated_at.timestamp(),
        }
    }

    fn token_pair(pair: &shared::auth::jwt::TokenPair) -> proto::TokenPair {
        proto::TokenPair {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            expires_in: pair.expires_in,
            refresh_expires_in: pair.refresh_expires_in,
        }
    }

    async fn auth_response(
        &self,
        outcome: crate::service::AuthOutcome,
    ) -> Result<proto::AuthResponse, Status> {
        let user = self
            .state
            .identity
            .users()
            .find_by_id(outcome.user.id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::internal("user vanished mid-flow"))?;

        Ok(proto::AuthResponse {
            tokens: Some(Self::token_pair(&outcome.tokens)),
            user: Some(Self::user_response(&user)),
            step_up_token: String::new(),
            requires_two_factor: false,
        })
    }

    fn parse_uuid(value: &str, what: &str) -> Result<Uuid, Status> {
        Uuid::parse_str(value).map_err(|_| Status::invalid_argument(format!("invalid {what}")))
    }

    fn otp_target(email: &str, phone: &str) -> Result<OtpTarget, Status> {
        match (email.is_empty(), phone.is_empty()) {
            (false, true) => Ok(OtpTarget::Email(shared::validation::normalize_email(email))),
            (true, false) => Ok(OtpTarget::Phone(phone.to_string())),
            _ => Err(Status::invalid_argument(
                "exactly one of email or phone is required",
            )),
        }
    }
}

#[tonic::async_trait]
impl AuthServiceGrpc for GrpcAuthService {
    // =========================================================================
    // TOKEN ENGINE - token:validate, token:introspect
    // =========================================================================

    async fn validate_token(
        &self,
        request: Request<proto::ValidateTokenRequest>,
    ) -> Result<Response<proto::ValidateTokenResponse>, Status> {
        self.gate(&request, ApiScope::TokenValidate).await?;
        let body = request.into_inner();

        // Invalid tokens are a *response*, not an error: callers want
        // the distinction in-band
        match self.state.gate.verify_user_token(&body.access_token).await {
            Ok(claims) => Ok(Response::new(proto::ValidateTokenResponse {
                valid: true,
                user_id: claims.sub.to_string(),
                email: claims.email,
                username: claims.username,
                roles: claims.roles,
                app_roles: claims.app_roles.unwrap_or_default(),
                application_id: claims
                    .application_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                expires_at: claims.exp,
                error_code: String::new(),
            })),
            Err(e) => Ok(Response::new(proto::ValidateTokenResponse {
                valid: false,
                error_code: e.error_code().to_string(),
                ..Default::default()
            })),
        }
    }

    async fn introspect_token(
        &self,
        request: Request<proto::IntrospectTokenRequest>,
    ) -> Result<Response<proto::IntrospectTokenResponse>, Status> {
        self.gate(&request, ApiScope::TokenIntrospect).await?;
        let body = request.into_inner();

        match self.state.gate.verify_user_token(&body.token).await {
            Ok(claims) => Ok(Response::new(proto::IntrospectTokenResponse {
                active: true,
                subject: claims.sub.to_string(),
                scope: claims.roles.join(" "),
                client_id: claims
                    .application_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                expires_at: claims.exp,
                token_type: "access".to_string(),
            })),
            Err(_) => Ok(Response::new(proto::IntrospectTokenResponse {
                active: false,
                ..Default::default()
            })),
        }
    }

    // =========================================================================
    // IDENTITY READS - users:read, profile:read
    // =========================================================================

    async fn get_user(
        &self,
        request: Request<proto::GetUserRequest>,
    ) -> Result<Response<proto::UserResponse>, Status> {
        self.gate(&request, ApiScope::UsersRead).await?;
        let body = request.into_inner();

        let users = self.state.identity.users();
        let user = match body.selector.ok_or_else(|| {
            Status::invalid_argument("a selector (user_id, email or phone) is required")
        })? {
            proto::get_user_request::Selector::UserId(id) => {
                users
                    .find_by_id(Self::parse_uuid(&id, "user_id")?)
                    .await
                    .map_err(Status::from)?
            }
            proto::get_user_request::Selector::Email(email) => users
                .find_by_email(&shared::validation::normalize_email(&email))
                .await
                .map_err(Status::from)?,
            proto::get_user_request::Selector::Phone(phone) => {
                users.find_by_phone(&phone).await.map_err(Status::from)?
            }
        };

        let user = user.ok_or_else(|| Status::not_found("user not found"))?;
        Ok(Response::new(Self::user_response(&user)))
    }

    async fn check_permission(
        &self,
        request: Request<proto::CheckPermissionRequest>,
    ) -> Result<Response<proto::CheckPermissionResponse>, Status> {
        self.gate(&request, ApiScope::UsersRead).await?;
        let body = request.into_inner();

        let user_id = Self::parse_uuid(&body.user_id, "user_id")?;
        let user = self
            .state
            .identity
            .users()
            .find_by_id(user_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("user not found"))?;

        let application = if body.application_id.is_empty() {
            None
        } else {
            let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
            self.state
                .applications
                .find_by_id(app_id)
                .await
                .map_err(Status::from)?
        };

        let allowed = self
            .state
            .identity
            .check_permission(&user, application.as_ref(), &body.resource, &body.action)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::CheckPermissionResponse { allowed }))
    }

    async fn get_user_roles(
        &self,
        request: Request<proto::GetUserRolesRequest>,
    ) -> Result<Response<proto::GetUserRolesResponse>, Status> {
        self.gate(&request, ApiScope::UsersRead).await?;
        let body = request.into_inner();

        let user_id = Self::parse_uuid(&body.user_id, "user_id")?;
        let user = self
            .state
            .identity
            .users()
            .find_by_id(user_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("user not found"))?;

        let application = if body.application_id.is_empty() {
            None
        } else {
            let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
            self.state
                .applications
                .find_by_id(app_id)
                .await
                .map_err(Status::from)?
        };

        let subject = self
            .state
            .identity
            .resolve_subject(&user, application.as_ref())
            .await
            .map_err(Status::from)?;

        let permissions = self
            .state
            .identity
            .permissions(&user, application.as_ref())
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::GetUserRolesResponse {
            roles: subject.roles,
            app_roles: subject.app_roles.unwrap_or_default(),
            permissions: permissions
                .iter()
                .map(|p| format!("{}:{}", p.resource, p.action))
                .collect(),
        }))
    }

    async fn get_app_profile(
        &self,
        request: Request<proto::GetAppProfileRequest>,
    ) -> Result<Response<proto::AppProfileResponse>, Status> {
        self.gate(&request, ApiScope::ProfileRead).await?;
        let body = request.into_inner();

        let user_id = Self::parse_uuid(&body.user_id, "user_id")?;
        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;

        let profile = self
            .state
            .identity
            .users()
            .find_profile(user_id, app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("profile not found"))?;

        Ok(Response::new(proto::AppProfileResponse {
            user_id: profile.user_id.to_string(),
            application_id: profile.application_id.to_string(),
            display_name: profile.display_name.unwrap_or_default(),
            avatar_url: profile.avatar_url.unwrap_or_default(),
            nickname: profile.nickname.unwrap_or_default(),
            metadata_json: profile.metadata.to_string(),
            app_roles: profile.app_roles,
            is_banned: profile.is_banned,
            last_access_at: profile.last_access_at.map(|t| t.timestamp()).unwrap_or(0),
        }))
    }

    async fn get_telegram_bot_access(
        &self,
        request: Request<proto::GetTelegramBotAccessRequest>,
    ) -> Result<Response<proto::GetTelegramBotAccessResponse>, Status> {
        self.gate(&request, ApiScope::ProfileRead).await?;
        let body = request.into_inner();

        let user_id = Self::parse_uuid(&body.user_id, "user_id")?;
        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;

        let profile = self
            .state
            .identity
            .users()
            .find_profile(user_id, app_id)
            .await
            .map_err(Status::from)?;

        // Telegram linkage lives in the profile's app-scoped metadata
        let telegram = profile
            .as_ref()
            .and_then(|p| p.metadata.get("telegram").cloned());

        match telegram {
            Some(data) => Ok(Response::new(proto::GetTelegramBotAccessResponse {
                linked: true,
                telegram_user_id: data.get("id").and_then(|v| v.as_i64()).unwrap_or(0),
                telegram_username: data
                    .get("username")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })),
            None => Ok(Response::new(proto::GetTelegramBotAccessResponse {
                linked: false,
                telegram_user_id: 0,
                telegram_username: String::new(),
            })),
        }
    }

    // =========================================================================
    // AUTH FLOWS - auth:login, auth:register
    // =========================================================================

    async fn login(
        &self,
        request: Request<proto::LoginRequest>,
    ) -> Result<Response<proto::AuthResponse>, Status> {
        let ctx = self.gate(&request, ApiScope::AuthLogin).await?;
        let device_id = Self::meta_str(&request, "x-device-id");
        let body = request.into_inner();

        let application = if body.application_id.is_empty() {
            ctx.require_application().map_err(Status::from)?.clone()
        } else {
            let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
            self.state
                .applications
                .find_by_id(app_id)
                .await
                .map_err(Status::from)?
                .ok_or_else(|| Status::not_found("application not found"))?
        };

        PolicyGate::require_method(&application, crate::domain::AuthMethod::Password)
            .map_err(Status::from)?;

        let result = self
            .state
            .auth
            .password_signin(
                &body.email,
                &body.password,
                &application,
                device_id.as_deref(),
                &ctx.client,
            )
            .await
            .map_err(Status::from)?;

        match result {
            SigninResult::Complete(outcome) => {
                Ok(Response::new(self.auth_response(outcome).await?))
            }
            SigninResult::StepUpRequired { step_up_token } => {
                Ok(Response::new(proto::AuthResponse {
                    tokens: None,
                    user: None,
                    step_up_token,
                    requires_two_factor: true,
                }))
            }
        }
    }

    async fn refresh_token(
        &self,
        request: Request<proto::RefreshTokenRequest>,
    ) -> Result<Response<proto::TokenPairResponse>, Status> {
        self.gate(&request, ApiScope::AuthLogin).await?;
        let body = request.into_inner();

        let pair = self
            .state
            .auth
            .refresh(&body.refresh_token)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::TokenPairResponse {
            tokens: Some(Self::token_pair(&pair)),
        }))
    }

    async fn logout(
        &self,
        request: Request<proto::LogoutRequest>,
    ) -> Result<Response<proto::LogoutResponse>, Status> {
        self.gate(&request, ApiScope::AuthLogin).await?;
        let body = request.into_inner();

        let access = if body.access_token.is_empty() {
            None
        } else {
            Some(body.access_token.as_str())
        };

        self.state
            .auth
            .logout(access, &body.refresh_token)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::LogoutResponse { success: true }))
    }

    async fn register(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::AuthResponse>, Status> {
        let ctx = self.gate(&request, ApiScope::AuthRegister).await?;
        let device_id = Self::meta_str(&request, "x-device-id");
        let body = request.into_inner();

        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        PolicyGate::require_method(&application, crate::domain::AuthMethod::Password)
            .map_err(Status::from)?;

        let username = if body.username.is_empty() {
            None
        } else {
            Some(body.username.as_str())
        };

        let outcome = self
            .state
            .auth
            .signup(
                &body.email,
                &body.password,
                username,
                &application,
                device_id.as_deref(),
                &ctx.client,
            )
            .await
            .map_err(Status::from)?;

        Ok(Response::new(self.auth_response(outcome).await?))
    }

    // =========================================================================
    // OTP FLOWS - auth:otp, auth:register
    // =========================================================================

    async fn send_otp(
        &self,
        request: Request<proto::SendOtpRequest>,
    ) -> Result<Response<proto::SendOtpResponse>, Status> {
        self.gate(&request, ApiScope::AuthOtp).await?;
        let body = request.into_inner();

        let target = Self::otp_target(&body.email, &body.phone)?;
        let otp_type = OtpType::parse(&body.otp_type)
            .ok_or_else(|| Status::invalid_argument("unknown otp_type"))?;

        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        let expires_in = self
            .state
            .auth
            .send_otp(&target, otp_type, &application)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::SendOtpResponse {
            sent: true,
            expires_in: expires_in as i64,
        }))
    }

    async fn verify_otp(
        &self,
        request: Request<proto::VerifyOtpRequest>,
    ) -> Result<Response<proto::AuthResponse>, Status> {
        let ctx = self.gate(&request, ApiScope::AuthOtp).await?;
        let device_id = Self::meta_str(&request, "x-device-id");
        let body = request.into_inner();

        let target = Self::otp_target(&body.email, &body.phone)?;
        let otp_type = OtpType::parse(&body.otp_type).unwrap_or(OtpType::Verification);

        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        let outcome = self
            .state
            .auth
            .verify_otp_auth(
                &target,
                &body.code,
                otp_type,
                &application,
                device_id.as_deref(),
                &ctx.client,
            )
            .await
            .map_err(Status::from)?;

        Ok(Response::new(self.auth_response(outcome).await?))
    }

    async fn otp_login(
        &self,
        request: Request<proto::OtpLoginRequest>,
    ) -> Result<Response<proto::SendOtpResponse>, Status> {
        self.gate(&request, ApiScope::AuthOtp).await?;
        let body = request.into_inner();

        let target = Self::otp_target(&body.email, &body.phone)?;
        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        let expires_in = self
            .state
            .auth
            .send_otp(&target, OtpType::Login, &application)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::SendOtpResponse {
            sent: true,
            expires_in: expires_in as i64,
        }))
    }

    async fn otp_login_verify(
        &self,
        request: Request<proto::OtpLoginVerifyRequest>,
    ) -> Result<Response<proto::AuthResponse>, Status> {
        let ctx = self.gate(&request, ApiScope::AuthOtp).await?;
        let device_id = Self::meta_str(&request, "x-device-id");
        let body = request.into_inner();

        let target = Self::otp_target(&body.email, &body.phone)?;
        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        let outcome = self
            .state
            .auth
            .verify_otp_auth(
                &target,
                &body.code,
                OtpType::Login,
                &application,
                device_id.as_deref(),
                &ctx.client,
            )
            .await
            .map_err(Status::from)?;

        Ok(Response::new(self.auth_response(outcome).await?))
    }

    async fn passwordless_init(
        &self,
        request: Request<proto::PasswordlessInitRequest>,
    ) -> Result<Response<proto::SendOtpResponse>, Status> {
        self.gate(&request, ApiScope::AuthRegister).await?;
        let body = request.into_inner();

        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        let expires_in = self
            .state
            .auth
            .passwordless_init(&body.email, &application)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::SendOtpResponse {
            sent: true,
            expires_in: expires_in as i64,
        }))
    }

    async fn passwordless_complete(
        &self,
        request: Request<proto::PasswordlessCompleteRequest>,
    ) -> Result<Response<proto::AuthResponse>, Status> {
        let ctx = self.gate(&request, ApiScope::AuthRegister).await?;
        let device_id = Self::meta_str(&request, "x-device-id");
        let body = request.into_inner();

        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        let username = (!body.username.is_empty()).then_some(body.username.as_str());
        let display_name = (!body.display_name.is_empty()).then_some(body.display_name.as_str());

        let outcome = self
            .state
            .auth
            .passwordless_complete(
                &body.email,
                &body.code,
                username,
                display_name,
                &application,
                device_id.as_deref(),
                &ctx.client,
            )
            .await
            .map_err(Status::from)?;

        Ok(Response::new(self.auth_response(outcome).await?))
    }

    // =========================================================================
    // OAUTH PROVIDER READS - oauth:read
    // =========================================================================

    async fn introspect_oauth_token(
        &self,
        request: Request<proto::IntrospectOauthTokenRequest>,
    ) -> Result<Response<proto::IntrospectTokenResponse>, Status> {
        self.gate(&request, ApiScope::OauthRead).await?;
        let body = request.into_inner();

        let result = self
            .state
            .oidc
            .introspect(&body.token)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::IntrospectTokenResponse {
            active: result.active,
            subject: result.sub.unwrap_or_default(),
            scope: result.scope.unwrap_or_default(),
            client_id: result.client_id.unwrap_or_default(),
            expires_at: result.exp.unwrap_or(0),
            token_type: result.token_type.unwrap_or_default(),
        }))
    }

    async fn get_oauth_client(
        &self,
        request: Request<proto::GetOauthClientRequest>,
    ) -> Result<Response<proto::OauthClientResponse>, Status> {
        self.gate(&request, ApiScope::OauthRead).await?;
        let body = request.into_inner();

        let client = self
            .state
            .oauth_repo
            .find_client(&body.client_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("client not found"))?;

        Ok(Response::new(proto::OauthClientResponse {
            client_id: client.client_id,
            name: client.name,
            client_type: client.client_type.clone(),
            redirect_uris: client.redirect_uris,
            allowed_scopes: client.allowed_scopes,
            require_pkce: client.require_pkce || client.client_type == "public",
            first_party: client.first_party,
            is_active: client.is_active,
        }))
    }

    // =========================================================================
    // CROSS-APPLICATION SSO - exchange:manage
    // =========================================================================

    async fn create_exchange_code(
        &self,
        request: Request<proto::CreateExchangeCodeRequest>,
    ) -> Result<Response<proto::CreateExchangeCodeResponse>, Status> {
        self.gate(&request, ApiScope::ExchangeManage).await?;
        let body = request.into_inner();

        let claims = self
            .state
            .gate
            .verify_user_token(&body.access_token)
            .await
            .map_err(Status::from)?;

        let target = Self::parse_uuid(&body.target_application_id, "target_application_id")?;

        let grant = self
            .state
            .auth
            .create_exchange_code(claims.sub, claims.application_id, target)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::CreateExchangeCodeResponse {
            exchange_code: grant.exchange_code,
            expires_at: grant.expires_at.timestamp(),
        }))
    }

    async fn redeem_exchange_code(
        &self,
        request: Request<proto::RedeemExchangeCodeRequest>,
    ) -> Result<Response<proto::AuthResponse>, Status> {
        let ctx = self.gate(&request, ApiScope::ExchangeManage).await?;
        let device_id = Self::meta_str(&request, "x-device-id");
        let body = request.into_inner();

        let outcome = self
            .state
            .auth
            .redeem_exchange_code(&body.exchange_code, device_id.as_deref(), &ctx.client)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(self.auth_response(outcome).await?))
    }

    // =========================================================================
    // OPERATIONAL - email:send, sync:users, oauth:read
    // =========================================================================

    async fn send_email(
        &self,
        request: Request<proto::SendEmailRequest>,
    ) -> Result<Response<proto::SendEmailResponse>, Status> {
        self.gate(&request, ApiScope::EmailSend).await?;
        let body = request.into_inner();

        self.state
            .email
            .send_email(&body.to, &body.subject, &body.body_html)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::SendEmailResponse { accepted: true }))
    }

    async fn sync_users(
        &self,
        request: Request<proto::SyncUsersRequest>,
    ) -> Result<Response<proto::SyncUsersResponse>, Status> {
        self.gate(&request, ApiScope::SyncUsers).await?;
        let body = request.into_inner();

        let updated_after = if body.updated_after.is_empty() {
            None
        } else {
            Some(
                chrono::DateTime::parse_from_rfc3339(&body.updated_after)
                    .map_err(|_| Status::invalid_argument("invalid updated_after timestamp"))?
                    .with_timezone(&chrono::Utc),
            )
        };

        let (users, total) = self
            .state
            .identity
            .sync_users(
                updated_after,
                body.page_size.max(0) as i64,
                body.page.max(0) as i64,
            )
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::SyncUsersResponse {
            users: users.iter().map(Self::user_response).collect(),
            total: total as i32,
        }))
    }

    async fn get_app_auth_config(
        &self,
        request: Request<proto::GetAppAuthConfigRequest>,
    ) -> Result<Response<proto::GetAppAuthConfigResponse>, Status> {
        self.gate(&request, ApiScope::OauthRead).await?;
        let body = request.into_inner();

        let app_id = Self::parse_uuid(&body.application_id, "application_id")?;
        let application = self
            .state
            .applications
            .find_by_id(app_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("application not found"))?;

        Ok(Response::new(proto::GetAppAuthConfigResponse {
            application_id: application.id.to_string(),
            name: application.name,
            display_name: application.display_name,
            allowed_auth_methods: application.allowed_auth_methods,
            homepage_url: application.homepage_url.unwrap_or_default(),
            branding_json: application
                .branding
                .map(|b| b.to_string())
                .unwrap_or_default(),
        }))
    }
}
