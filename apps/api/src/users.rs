//! `/api/users`: account creation plus self-scoped read and update.
//! A caller can only ever see or change its own record; any other id is 404.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::account::{
    create_account, is_valid_email, normalize_email, validate_new_password, AccountInput,
};
use crate::auth::jwt::Principal;
use crate::auth::password::hash_password;
use crate::errors::AppError;
use crate::models::user::{PublicUser, UserRow};
use crate::response::ApiResponse;
use crate::settings::save_profile;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "passwordConfirm")]
    pub password_confirm: Option<String>,
}

impl From<CreateUserRequest> for AccountInput {
    /// A missing confirmation counts as confirmed.
    fn from(req: CreateUserRequest) -> Self {
        AccountInput {
            password_confirm: req.password_confirm.or_else(|| req.password.clone()),
            name: req.name,
            email: req.email,
            password: req.password,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

fn not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

/// Resolves a path id to the caller's own id, or 404.
fn own_id(principal: &Principal, raw: &str) -> Result<Uuid, AppError> {
    match Uuid::parse_str(raw) {
        Ok(id) if id == principal.user_id => Ok(id),
        _ => Err(not_found()),
    }
}

async fn load(state: &AppState, id: Uuid) -> Result<UserRow, AppError> {
    UserRow::find_by_id(&state.db, id).await?.ok_or_else(not_found)
}

/// POST /api/users
pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let user = create_account(&state, req.into()).await?;
    Ok(ApiResponse::created(PublicUser::from(&user)))
}

/// GET /api/users
pub async fn handle_list_users(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<Vec<PublicUser>>, AppError> {
    let user = load(&state, principal.user_id).await?;
    Ok(ApiResponse::ok(vec![PublicUser::from(&user)]))
}

/// GET /api/users/:id
pub async fn handle_get_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let user = load(&state, own_id(&principal, &id)?).await?;
    Ok(ApiResponse::ok(PublicUser::from(&user)))
}

/// PUT /api/users/:id
/// Absent fields keep their stored value.
pub async fn handle_update_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let id = own_id(&principal, &id)?;
    let password = req.password.filter(|p| !p.is_empty());
    if let Some(password) = &password {
        validate_new_password(password)?;
    }
    let current = load(&state, id).await?;

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| current.name.clone());
    let email = match req.email.map(|e| normalize_email(&e)).filter(|e| !e.is_empty()) {
        Some(email) if !is_valid_email(&email) => {
            return Err(AppError::Validation("Invalid email".to_string()))
        }
        Some(email) => email,
        None => current.email.clone(),
    };

    let mut user = if name != current.name || email != current.email {
        save_profile(&state, id, &name, &email).await?
    } else {
        current
    };

    if let Some(password) = password {
        let password_hash = hash_password(password).await?;
        UserRow::update_password(&state.db, id, &password_hash).await?;
        user = load(&state, id).await?;
    }

    info!(user_id = %id, "user updated");
    Ok(ApiResponse::ok(PublicUser::from(&user)))
}
