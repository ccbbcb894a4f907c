use axum::{
    extract::{FromRef, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::account::{create_account, normalize_email, validate_new_password, AccountInput};
use crate::auth::cookies::{clear_refresh_cookie, read_refresh_cookie, refresh_cookie};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::tokens::{
    deliver_or_rollback, hash_token, issue_refresh, revoke_refresh, rotate_refresh, OneTimeToken,
};
use crate::errors::AppError;
use crate::mailer::{password_reset_mail, verification_mail};
use crate::models::user::{PublicUser, UserRow};
use crate::response::{ApiResponse, MessageBody};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / response bodies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "passwordConfirm")]
    pub password_confirm: Option<String>,
}

impl From<RegisterRequest> for AccountInput {
    fn from(req: RegisterRequest) -> Self {
        AccountInput {
            name: req.name,
            email: req.email,
            password: req.password,
            password_confirm: req.password_confirm,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordResponse {
    pub token: String,
    pub message: String,
}

fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<ApiResponse<MessageBody>, AppError> {
    create_account(&state, req.into()).await?;
    Ok(ApiResponse::created(MessageBody::new(
        "Registration successful. Please verify your email.",
    )))
}

/// POST /api/auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let email = normalize_email(&required(req.email, "Email and password are required")?);
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Email and password are required".to_string()))?;

    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());

    let user = UserRow::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    if let Err(e) = state.refresh_tokens.purge_expired_for_user(user.id).await {
        warn!(user_id = %user.id, "Failed to purge expired refresh tokens: {e}");
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(user.id, user.role())?;
    let refresh = issue_refresh(
        state.refresh_tokens.as_ref(),
        user.id,
        state.config.refresh_token_expires_in,
    )
    .await?;

    info!(user_id = %user.id, "user logged in");

    let cookie = refresh_cookie(
        &refresh,
        state.config.refresh_token_expires_in,
        state.config.production,
    );
    let body = LoginResponse {
        token,
        expires_in: keys.access_ttl,
        user: PublicUser::from(&user),
    };
    Ok(([(header::SET_COOKIE, cookie)], ApiResponse::ok(body)).into_response())
}

/// POST /api/auth/refresh
/// Any failure clears the refresh cookie.
pub async fn handle_refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match refresh_session(&state, &headers).await {
        Ok((body, cookie)) => ([(header::SET_COOKIE, cookie)], ApiResponse::ok(body)).into_response(),
        Err(err) => (
            [(header::SET_COOKIE, clear_refresh_cookie(state.config.production))],
            err,
        )
            .into_response(),
    }
}

async fn refresh_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(RefreshResponse, String), AppError> {
    let presented = read_refresh_cookie(headers)
        .ok_or_else(|| AppError::Unauthorized("Refresh token is missing".to_string()))?;

    let keys = JwtKeys::from_ref(state);
    let (token, successor) = rotate_refresh(
        state.refresh_tokens.as_ref(),
        &presented,
        state.config.refresh_token_expires_in,
        |user_id| {
            let keys = &keys;
            async move {
                let user = UserRow::find_by_id(&state.db, user_id)
                    .await?
                    .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;
                Ok::<_, AppError>(keys.sign_access(user.id, user.role())?)
            }
        },
    )
    .await?;

    let cookie = refresh_cookie(
        &successor,
        state.config.refresh_token_expires_in,
        state.config.production,
    );

    Ok((
        RefreshResponse {
            token,
            expires_in: keys.access_ttl,
        },
        cookie,
    ))
}

/// POST /api/auth/logout
/// Never fails; the cookie is cleared regardless of the store outcome.
pub async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(presented) = read_refresh_cookie(&headers) {
        revoke_refresh(state.refresh_tokens.as_ref(), &presented).await;
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, clear_refresh_cookie(state.config.production))],
        ApiResponse::ok(MessageBody::new("Logged out successfully")),
    )
        .into_response()
}

/// POST /api/auth/verify-email
pub async fn handle_verify_email(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<ApiResponse<MessageBody>, AppError> {
    let token = required(req.token, "Verification token is required")?;

    let user_id = UserRow::verify_email(&state.db, &hash_token(&token))
        .await?
        .ok_or_else(|| {
            AppError::Validation("Token tidak valid atau sudah kadaluarsa".to_string())
        })?;

    info!(user_id = %user_id, "email verified");
    Ok(ApiResponse::ok(MessageBody::new("Email berhasil diverifikasi")))
}

/// POST /api/auth/resend-verification
pub async fn handle_resend_verification(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<ApiResponse<MessageBody>, AppError> {
    let email = normalize_email(&required(req.email, "Email is required")?);

    let user = UserRow::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if user.email_verified {
        return Err(AppError::Validation("Email already verified".to_string()));
    }

    let token = OneTimeToken::verification();
    UserRow::set_verification_token(&state.db, user.id, &token.hash, token.expires_at).await?;

    state
        .mailer
        .send(verification_mail(&user.email, &state.config.client_url, &token.raw))
        .await?;

    Ok(ApiResponse::ok(MessageBody::new(
        "Email verifikasi baru telah dikirim.",
    )))
}

/// POST /api/auth/forgotPassword
/// The reset token is cleared again if the email cannot be delivered.
pub async fn handle_forgot_password(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<ApiResponse<MessageBody>, AppError> {
    let email = normalize_email(&required(req.email, "Email is required")?);

    let user = UserRow::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let token = OneTimeToken::password_reset();
    UserRow::set_reset_token(&state.db, user.id, &token.hash, token.expires_at).await?;

    let mail = password_reset_mail(&user.email, &state.config.client_url, &token.raw);
    deliver_or_rollback(state.mailer.send(mail), async {
        UserRow::clear_reset_token(&state.db, user.id)
            .await
            .map_err(AppError::from)
    })
    .await?;

    info!(user_id = %user.id, "password reset email sent");
    Ok(ApiResponse::ok(MessageBody::new("Token sent to email!")))
}

/// PUT /api/auth/resetPassword/:token
/// Consumes the token, revokes every refresh session and logs the user in.
pub async fn handle_reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<ApiResponse<ResetPasswordResponse>, AppError> {
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Password is required".to_string()))?;
    validate_new_password(&password)?;

    let password_hash = hash_password(password).await?;
    let user = UserRow::reset_password(&state.db, &hash_token(&token), &password_hash)
        .await?
        .ok_or_else(|| {
            warn!("Password reset rejected: token invalid or expired");
            AppError::Validation("Token is invalid or has expired".to_string())
        })?;

    state.refresh_tokens.delete_for_user(user.id).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(user.id, user.role())?;

    info!(user_id = %user.id, "password reset");
    Ok(ApiResponse::ok(ResetPasswordResponse {
        token,
        message: "Password has been reset successfully".to_string(),
    }))
}
