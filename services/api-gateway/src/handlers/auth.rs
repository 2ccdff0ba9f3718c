//! Authentication Handlers
//!
//! Signup, login, refresh-token rotation, logout and password recovery.
//! Refresh tokens travel in an `HttpOnly` cookie scoped to `/api/v1/auth`.
//! Only the hashes of refresh and reset tokens are kept in the session store.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use pharmy_database::{PasswordReset, RefreshSession, TenantRepository, UserRepository};
use pharmy_models::{normalize_email, Profile, SubscriptionTier, Tenant, User, UserRole};
use pharmy_utils::mailer::password_reset_email;
use pharmy_utils::{
    generate_refresh_token, hash_token, validate_model, validate_password_strength, PharmyError,
    PharmyResult,
};

use crate::middleware::{load_tenant, AuthUser};
use crate::AppState;

pub const REFRESH_COOKIE: &str = "refresh_token";
const COOKIE_PATH: &str = "/api/v1/auth";

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 2, max = 200, message = "Pharmacy name must be between 2 and 200 characters"))]
    pub pharmacy_name: String,
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"))]
    pub password: String,
    #[validate(length(min = 10, max = 15, message = "Phone number must be between 10 and 15 characters"))]
    pub phone_number: Option<String>,
    #[validate(length(max = 50, message = "Drug license number is too long"))]
    pub drug_license_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

/// The reset token comes in the body or as `Authorization: Bearer <token>`.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user: User,
    pub profile: Option<Profile>,
    pub tenant: Tenant,
    pub tier: SubscriptionTier,
}

/// Create a pharmacy with its first administrator and sign them in
///
/// POST /api/v1/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> PharmyResult<Response> {
    validate_model(&request)?;

    let users = UserRepository::new(state.pool.clone());
    let email = normalize_email(&request.email);
    if users.find_by_email(&email).await?.is_some() {
        return Err(PharmyError::conflict("An account with this email already exists"));
    }

    let mut tenant = Tenant::new(request.pharmacy_name.trim().to_string());
    tenant.drug_license_number = request.drug_license_number.clone();
    tenant.phone = request.phone_number.clone();

    let mut admin = User::new(
        tenant.id,
        request.name.trim().to_string(),
        email,
        UserRole::Admin,
        state.hasher.hash(&request.password),
    );
    admin.phone_number = request.phone_number.clone();

    TenantRepository::new(state.pool.clone())
        .create_with_admin(&tenant, &admin)
        .await?;

    tracing::info!(tenant_id = %tenant.id, user_id = %admin.id, "Pharmacy registered");

    let (cookie, body) = start_session(&state, admin).await?;
    Ok((StatusCode::CREATED, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Exchange email and password for an access token and a refresh cookie
///
/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> PharmyResult<Response> {
    validate_model(&request)?;

    let email = normalize_email(&request.email);
    let auth = &state.config.auth;

    if state.sessions.login_failures(&email).await? >= auth.max_login_attempts {
        state.metrics.login_failures.inc();
        return Err(PharmyError::rate_limit(format!(
            "Too many failed login attempts. Try again in {} minutes",
            auth.login_lockout_minutes
        )));
    }

    let user = UserRepository::new(state.pool.clone()).find_by_email(&email).await?;
    let user = match user {
        Some(user) if state.hasher.verify(&request.password, &user.password_hash) => user,
        _ => {
            let window = Duration::minutes(auth.login_lockout_minutes as i64);
            let failures = state.sessions.record_login_failure(&email, window).await?;
            state.metrics.login_failures.inc();
            tracing::info!(failures, "Failed login attempt");
            return Err(PharmyError::authentication("Invalid email or password"));
        }
    };

    if !user.is_active {
        return Err(PharmyError::authorization("Account is deactivated"));
    }
    let caller = AuthUser {
        user_id: user.id,
        tenant_id: user.tenant_id,
        role: user.role,
    };
    load_tenant(&state, &caller).await?;

    state.sessions.clear_login_failures(&email).await?;
    UserRepository::new(state.pool.clone())
        .touch_last_login(user.id, Utc::now())
        .await?;

    tracing::info!(user_id = %user.id, tenant_id = %user.tenant_id, "User logged in");

    let (cookie, body) = start_session(&state, user).await?;
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Rotate the refresh token and issue a new access token
///
/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> PharmyResult<Response> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let Some(token) = presented_refresh_token(&headers, body.refresh_token) else {
        return Ok(reject_refresh(&state, "Missing refresh token"));
    };

    // Taking the session revokes it, so each refresh token works once.
    let Some(session) = state.sessions.take_session(&hash_token(&token)).await? else {
        return Ok(reject_refresh(&state, "Invalid or expired refresh token"));
    };

    let user = UserRepository::new(state.pool.clone())
        .find_by_id(session.tenant_id, session.user_id)
        .await?;
    let user = match user {
        Some(user) if user.is_active => user,
        _ => return Ok(reject_refresh(&state, "Account is no longer active")),
    };

    let tenant = TenantRepository::new(state.pool.clone())
        .find_by_id(user.tenant_id)
        .await?;
    if !tenant.map(|t| t.is_active).unwrap_or(false) {
        return Ok(reject_refresh(&state, "Pharmacy account is inactive"));
    }

    let (cookie, body) = start_session(&state, user).await?;
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Revoke the refresh token and clear the cookie
///
/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> PharmyResult<Response> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    if let Some(token) = presented_refresh_token(&headers, body.refresh_token) {
        state.sessions.revoke_session(&hash_token(&token)).await?;
    }

    Ok((
        [(header::SET_COOKIE, clear_cookie(&state))],
        Json(json!({ "message": "Logged out successfully" })),
    )
        .into_response())
}

/// GET /api/v1/auth/me
pub async fn me(State(state): State<AppState>, user: AuthUser) -> PharmyResult<Json<User>> {
    let account = UserRepository::new(state.pool.clone())
        .find_by_id(user.tenant_id, user.user_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;
    Ok(Json(account))
}

/// GET /api/v1/auth/session
pub async fn session(State(state): State<AppState>, user: AuthUser) -> PharmyResult<Json<SessionResponse>> {
    let users = UserRepository::new(state.pool.clone());
    let account = users
        .find_by_id(user.tenant_id, user.user_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;
    let profile = users.find_profile(user.user_id).await?;
    let context = load_tenant(&state, &user).await?;

    Ok(Json(SessionResponse {
        authenticated: true,
        user: account,
        profile,
        tenant: context.tenant,
        tier: context.tier,
    }))
}

/// Mail a single-use reset link. The answer is the same whether or not the
/// address belongs to an account.
///
/// POST /api/v1/auth/forgot-password
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> PharmyResult<Json<serde_json::Value>> {
    validate_model(&request)?;

    let email = normalize_email(&request.email);
    let user = UserRepository::new(state.pool.clone()).find_by_email(&email).await?;
    match user {
        Some(user) if user.is_active => send_reset_link(&state, &user).await?,
        _ => tracing::info!("Password reset requested for unknown or inactive account"),
    }

    Ok(Json(json!({
        "success": true,
        "message": "If an account exists for this email, a reset link has been sent",
    })))
}

/// Set a new password with a mailed reset token
///
/// POST /api/v1/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResetPasswordRequest>,
) -> PharmyResult<Json<serde_json::Value>> {
    check_password_strength(&request.new_password)?;
    let token = presented_reset_token(&headers, request.token)
        .ok_or_else(|| PharmyError::validation("token", "Reset token is required"))?;

    // Taking the reset consumes it, so a token works once.
    let reset = state
        .sessions
        .take_password_reset(&hash_token(&token))
        .await?
        .ok_or_else(|| PharmyError::authentication("Invalid or expired reset token"))?;

    let users = UserRepository::new(state.pool.clone());
    let user = users
        .find_by_id(reset.tenant_id, reset.user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| PharmyError::authentication("Invalid or expired reset token"))?;

    users
        .update_password(user.tenant_id, user.id, &state.hasher.hash(&request.new_password))
        .await?;
    state.sessions.clear_login_failures(&user.email).await?;

    tracing::info!(user_id = %user.id, tenant_id = %user.tenant_id, "Password reset");
    Ok(Json(json!({ "success": true, "message": "Password has been reset" })))
}

/// POST /api/v1/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<ChangePasswordRequest>,
) -> PharmyResult<Json<serde_json::Value>> {
    check_password_strength(&request.new_password)?;

    let users = UserRepository::new(state.pool.clone());
    let user = users
        .find_by_id(caller.tenant_id, caller.user_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;

    if !state.hasher.verify(&request.current_password, &user.password_hash) {
        return Err(PharmyError::authentication("Current password is incorrect"));
    }
    if request.current_password == request.new_password {
        return Err(PharmyError::validation(
            "new_password",
            "New password must differ from the current password",
        ));
    }

    users
        .update_password(user.tenant_id, user.id, &state.hasher.hash(&request.new_password))
        .await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(Json(json!({ "success": true, "message": "Password changed successfully" })))
}

async fn send_reset_link(state: &AppState, user: &User) -> PharmyResult<()> {
    let auth = &state.config.auth;
    let token = generate_refresh_token();
    let reset = PasswordReset {
        user_id: user.id,
        tenant_id: user.tenant_id,
        requested_at: Utc::now(),
    };
    state
        .sessions
        .put_password_reset(
            &hash_token(&token),
            &reset,
            Duration::minutes(auth.reset_token_ttl_minutes),
        )
        .await?;

    let email = password_reset_email(
        &user.name,
        &reset_link(&auth.password_reset_url, &token),
        auth.reset_token_ttl_minutes,
    );
    // A delivery failure must not tell the caller whether the account exists.
    if let Err(e) = state.mailer.send(&user.name, &user.email, &email).await {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to send password reset mail");
    }
    Ok(())
}

fn reset_link(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", base, separator, token)
}

/// Body first, then the bearer header.
fn presented_reset_token(headers: &HeaderMap, body_token: Option<String>) -> Option<String> {
    body_token
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn check_password_strength(password: &str) -> PharmyResult<()> {
    validate_password_strength(password).map_err(|e| {
        let message = e
            .message
            .map(|m| m.to_string())
            .unwrap_or_else(|| "Password is too weak".to_string());
        PharmyError::validation("new_password", message)
    })
}

async fn start_session(state: &AppState, user: User) -> PharmyResult<(String, TokenResponse)> {
    let now = Utc::now();
    let refresh_token = generate_refresh_token();
    let session = RefreshSession {
        user_id: user.id,
        tenant_id: user.tenant_id,
        issued_at: now,
    };
    state
        .sessions
        .put_session(&hash_token(&refresh_token), &session, state.tokens.refresh_ttl())
        .await?;

    let access_token = state
        .tokens
        .issue_access_token(user.id, user.tenant_id, user.role, now)?;

    let body = TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.tokens.access_ttl().num_seconds(),
        user,
    };
    Ok((refresh_cookie(state, &refresh_token), body))
}

fn reject_refresh(state: &AppState, message: &str) -> Response {
    let mut response = PharmyError::authentication(message).into_response();
    if let Ok(value) = clear_cookie(state).parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// Cookie first, then the JSON body.
fn presented_refresh_token(headers: &HeaderMap, body_token: Option<String>) -> Option<String> {
    cookie_value(headers, REFRESH_COOKIE)
        .or(body_token)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn refresh_cookie(state: &AppState, token: &str) -> String {
    build_cookie(token, state.tokens.refresh_ttl().num_seconds(), state.config.auth.cookie_secure)
}

fn clear_cookie(state: &AppState) -> String {
    build_cookie("", 0, state.config.auth.cookie_secure)
}

fn build_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path={}; Max-Age={}",
        REFRESH_COOKIE, value, COOKIE_PATH, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
