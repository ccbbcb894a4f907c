//! Account creation shared by `/api/auth/register` and `POST /api/users`.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::auth::password::{hash_password, MIN_PASSWORD_LEN};
use crate::auth::tokens::OneTimeToken;
use crate::errors::AppError;
use crate::mailer::verification_mail;
use crate::models::user::{is_unique_violation, NewUser, UserRow};
use crate::state::AppState;

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
        .is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_new_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Registration input after JSON decoding; every field may be missing.
#[derive(Debug, Clone, Default)]
pub struct AccountInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

/// Checked registration fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidAccount {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl AccountInput {
    pub fn validate(self) -> Result<ValidAccount, AppError> {
        let name = self.name.unwrap_or_default().trim().to_string();
        let email = normalize_email(&self.email.unwrap_or_default());
        let password = self.password.unwrap_or_default();

        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "Name, email and password are required".to_string(),
            ));
        }
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email".to_string()));
        }
        if self.password_confirm.as_deref() != Some(password.as_str()) {
            return Err(AppError::Validation("Passwords do not match".to_string()));
        }
        validate_new_password(&password)?;

        Ok(ValidAccount {
            name,
            email,
            password,
        })
    }
}

/// Creates the account and emails a verification link. The raw token is
/// only ever placed in the email. A delivery failure is logged; the user can
/// request a new link through `resend-verification`.
pub async fn create_account(state: &AppState, input: AccountInput) -> Result<UserRow, AppError> {
    let account = input.validate()?;

    if UserRow::email_taken(&state.db, &account.email, None).await? {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(account.password).await?;
    let token = OneTimeToken::verification();

    let user = UserRow::create(
        &state.db,
        NewUser {
            name: &account.name,
            email: &account.email,
            password_hash: &password_hash,
            verification_token_hash: &token.hash,
            verification_expires: token.expires_at,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email already registered".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    info!(user_id = %user.id, "user registered");

    let mail = verification_mail(&user.email, &state.config.client_url, &token.raw);
    if let Err(e) = state.mailer.send(mail).await {
        warn!(user_id = %user.id, "Verification email could not be sent: {e}");
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(password: &str, confirm: &str) -> AccountInput {
        AccountInput {
            name: Some("Ana".into()),
            email: Some("  Ana@X.com ".into()),
            password: Some(password.into()),
            password_confirm: Some(confirm.into()),
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("ana@x.com"));
        assert!(!is_valid_email("ana@x"));
        assert!(!is_valid_email("ana x@y.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_valid_input_is_normalized() {
        let account = input("Secret123", "Secret123").validate().unwrap();
        assert_eq!(account.email, "ana@x.com");
        assert_eq!(account.name, "Ana");
    }

    #[test]
    fn test_password_mismatch_is_rejected() {
        let err = input("Secret123", "Secret124").validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg == "Passwords do not match"));
    }

    #[test]
    fn test_short_password_is_rejected() {
        assert!(input("short", "short").validate().is_err());
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let err = AccountInput::default().validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
