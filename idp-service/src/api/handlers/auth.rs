//! # Authentication Handlers
//!
//! REST endpoints for the credential flows. Each handler:
//!
//! 1. validates the body with the `validator` crate
//! 2. extracts client context and the device id (cookie chain)
//! 3. runs the policy gate (application, IP filters, limits, method)
//! 4. calls the orchestrator
//! 5. shapes the response, attaching the device cookie when one was
//!    minted

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use shared::{errors::ApiError, validation};

use crate::api::client_info::{extract_client_context, extract_credential, resolve_device_id};
use crate::api::dto::{
    AuthResponseDto, ChangePasswordRequest, ForgotPasswordRequest, HealthResponse, LogoutRequest,
    MessageResponse, OtpSendRequest, OtpSentResponse, OtpVerifyRequest,
    PasswordlessCompleteRequest, PasswordlessInitRequest, RefreshRequest, ResetPasswordRequest,
    SigninRequest, SignupRequest, StepUpResponseDto, TokenExchangeRedeemRequest,
    TokenExchangeRequest, TokenExchangeResponse, TokenResponseDto, TotpCodeRequest,
    TotpEnrollResponse, TwoFactorVerifyRequest,
};
use crate::domain::{AuthMethod, OtpType};
use crate::policy::PolicyGate;
use crate::service::otp_service::OtpTarget;
use crate::service::SigninResult;
use crate::AppState;

// =============================================================================
// HEALTH
// =============================================================================

/// `GET /health`
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        timestamp: Utc::now().to_rfc3339(),
    };

    HttpResponse::Ok().json(response)
}

// =============================================================================
// PASSWORD FLOWS
// =============================================================================

/// `POST /api/auth/signup`
pub async fn signup(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, AuthMethod::Password)?;

    let outcome = state
        .auth
        .signup(
            &body.email,
            &body.password,
            body.username.as_deref(),
            &application,
            Some(&device.device_id),
            &client,
        )
        .await?;

    let mut response = HttpResponse::Created();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}

/// `POST /api/auth/signin`
pub async fn signin(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<SigninRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, AuthMethod::Password)?;

    let result = state
        .auth
        .password_signin(
            &body.email,
            &body.password,
            &application,
            Some(&device.device_id),
            &client,
        )
        .await?;

    match result {
        SigninResult::Complete(outcome) => {
            let mut response = HttpResponse::Ok();
            if let Some(cookie) = device.set_cookie {
                response.cookie(cookie);
            }
            Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
        }
        SigninResult::StepUpRequired { step_up_token } => {
            Ok(HttpResponse::Ok().json(StepUpResponseDto {
                requires_two_factor: true,
                step_up_token,
            }))
        }
    }
}

/// `POST /api/auth/2fa/verify` - the TOTP second leg.
pub async fn two_factor_verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TwoFactorVerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);

    let outcome = state
        .auth
        .verify_two_factor(
            &body.step_up_token,
            &body.code,
            Some(&device.device_id),
            &client,
        )
        .await?;

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}

/// `POST /api/auth/refresh`
pub async fn refresh(
    state: web::Data<AppState>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let pair = state.auth.refresh(&body.refresh_token).await?;

    Ok(HttpResponse::Ok().json(TokenResponseDto::from(pair)))
}

/// `POST /api/auth/logout`
pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<LogoutRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let access_token = extract_credential(&req);
    state
        .auth
        .logout(access_token.as_deref(), &body.refresh_token)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("logged out")))
}

// =============================================================================
// OTP FLOWS
// =============================================================================

/// Resolves the email-xor-phone target and the auth method it implies.
fn otp_target(
    email: &Option<String>,
    phone: &Option<String>,
) -> Result<(OtpTarget, AuthMethod), ApiError> {
    match (email, phone) {
        (Some(email), None) => Ok((
            OtpTarget::Email(shared::validation::normalize_email(email)),
            AuthMethod::OtpEmail,
        )),
        (None, Some(phone)) => Ok((OtpTarget::Phone(phone.clone()), AuthMethod::OtpSms)),
        _ => Err(ApiError::BadRequest {
            message: "exactly one of email or phone is required".to_string(),
        }),
    }
}

/// `POST /api/auth/otp/send` - verification/registration code.
pub async fn otp_send(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<OtpSendRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let (target, method) = otp_target(&body.email, &body.phone)?;

    let client = extract_client_context(&req);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, method)?;

    let expires_in = state
        .auth
        .send_otp(&target, OtpType::Verification, &application)
        .await?;

    Ok(HttpResponse::Ok().json(OtpSentResponse {
        sent: true,
        expires_in,
    }))
}

/// `POST /api/auth/otp/verify` - completes verification, creating the
/// user and profile on first contact.
pub async fn otp_verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<OtpVerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    otp_verify_inner(req, state, body, OtpType::Verification).await
}

/// `POST /api/auth/otp/login` - requests a login code.
pub async fn otp_login(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<OtpSendRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let (target, method) = otp_target(&body.email, &body.phone)?;

    let client = extract_client_context(&req);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, method)?;

    let expires_in = state
        .auth
        .send_otp(&target, OtpType::Login, &application)
        .await?;

    Ok(HttpResponse::Ok().json(OtpSentResponse {
        sent: true,
        expires_in,
    }))
}

/// `POST /api/auth/otp/login/verify`
pub async fn otp_login_verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<OtpVerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    otp_verify_inner(req, state, body, OtpType::Login).await
}

async fn otp_verify_inner(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<OtpVerifyRequest>,
    otp_type: OtpType,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let (target, method) = otp_target(&body.email, &body.phone)?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, method)?;

    let outcome = state
        .auth
        .verify_otp_auth(
            &target,
            &body.code,
            otp_type,
            &application,
            Some(&device.device_id),
            &client,
        )
        .await?;

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}

// =============================================================================
// PASSWORDLESS REGISTRATION
// =============================================================================

/// `POST /api/auth/passwordless/init`
pub async fn passwordless_init(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PasswordlessInitRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, AuthMethod::OtpEmail)?;

    let expires_in = state.auth.passwordless_init(&body.email, &application).await?;

    Ok(HttpResponse::Ok().json(OtpSentResponse {
        sent: true,
        expires_in,
    }))
}

/// `POST /api/auth/passwordless/complete`
pub async fn passwordless_complete(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PasswordlessCompleteRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, AuthMethod::OtpEmail)?;

    let outcome = state
        .auth
        .passwordless_complete(
            &body.email,
            &body.code,
            body.username.as_deref(),
            body.display_name.as_deref(),
            &application,
            Some(&device.device_id),
            &client,
        )
        .await?;

    let mut response = HttpResponse::Created();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}

// =============================================================================
// PASSWORD MANAGEMENT
// =============================================================================

/// `POST /api/auth/password/forgot` - always 200, no enumeration.
pub async fn forgot_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ForgotPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let application = state
        .gate
        .public_context(body.application_id, &client)
        .await?;

    state.auth.forgot_password(&body.email, &application).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "if the address is registered, a reset code has been sent",
    )))
}

/// `POST /api/auth/password/reset`
pub async fn reset_password(
    state: web::Data<AppState>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .auth
        .reset_password(&body.email, &body.code, &body.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("password updated")))
}

/// `POST /api/auth/password/change` - authenticated.
pub async fn change_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    state
        .auth
        .change_password(claims.sub, &body.current_password, &body.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("password updated")))
}

// =============================================================================
// TOTP MANAGEMENT
// =============================================================================

/// `POST /api/auth/2fa/enable`
pub async fn totp_enable(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let (secret, provisioning_uri) = state.auth.totp_enroll_begin(claims.sub).await?;

    Ok(HttpResponse::Ok().json(TotpEnrollResponse {
        secret,
        provisioning_uri,
    }))
}

/// `POST /api/auth/2fa/enable/confirm`
pub async fn totp_enable_confirm(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TotpCodeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    state.auth.totp_enroll_confirm(claims.sub, &body.code).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("two-factor enabled")))
}

/// `POST /api/auth/2fa/disable`
pub async fn totp_disable(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TotpCodeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    state.auth.totp_disable(claims.sub, &body.code).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("two-factor disabled")))
}

// =============================================================================
// TOKEN EXCHANGE
// =============================================================================

/// `POST /api/auth/token/exchange`
pub async fn token_exchange(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TokenExchangeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    // The presented access token is the credential for this operation
    let claims = state.gate.verify_user_token(&body.access_token).await?;

    let grant = state
        .auth
        .create_exchange_code(claims.sub, claims.application_id, body.target_application_id)
        .await?;

    Ok(HttpResponse::Ok().json(TokenExchangeResponse {
        exchange_code: grant.exchange_code,
        expires_at: grant.expires_at,
    }))
}

/// `POST /api/auth/token/exchange/redeem`
pub async fn token_exchange_redeem(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TokenExchangeRedeemRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);

    let outcome = state
        .auth
        .redeem_exchange_code(&body.exchange_code, Some(&device.device_id), &client)
        .await?;

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}

// =============================================================================
// SHARED
// =============================================================================

/// Runs the policy gate for a protected route.
pub async fn authenticate(
    req: &HttpRequest,
    state: &web::Data<AppState>,
) -> Result<crate::policy::RequestContext, ApiError> {
    let credential = extract_credential(req);
    let stated = crate::api::client_info::extract_stated_application(req)?;
    let client = extract_client_context(req);
    // Header wins over cookie; never generated on protected routes
    let device = req
        .headers()
        .get(crate::api::client_info::DEVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| {
            req.cookie(crate::api::client_info::DEVICE_COOKIE)
                .map(|c| c.value().to_string())
        });

    state
        .gate
        .authenticate(credential.as_deref(), stated, &client, device)
        .await
}
