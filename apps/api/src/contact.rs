use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use crate::auth::account::is_valid_email;
use crate::errors::AppError;
use crate::mailer::{contact_mail, ContactMessage};
use crate::response::{ApiResponse, MessageBody};
use crate::state::AppState;

pub const MIN_MESSAGE_LEN: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub category: Option<String>,
    pub subject: String,
    pub message: String,
}

impl ContactRequest {
    /// Reports the first failing field.
    pub fn validate(&self) -> Result<(), AppError> {
        let fail = |msg: &str| Err(AppError::Validation(msg.to_string()));

        if self.name.trim().is_empty() {
            return fail("Name is required");
        }
        if !is_valid_email(self.email.trim()) {
            return fail("Invalid email address");
        }
        if self.subject.trim().is_empty() {
            return fail("Subject is required");
        }
        if self.message.trim().chars().count() < MIN_MESSAGE_LEN {
            return fail("Message must be at least 10 characters");
        }
        Ok(())
    }
}

/// POST /api/contact
pub async fn handle_contact(
    State(state): State<AppState>,
    Json(req): Json<ContactRequest>,
) -> Result<ApiResponse<MessageBody>, AppError> {
    req.validate()?;

    let message = ContactMessage {
        name: req.name.trim(),
        email: req.email.trim(),
        category: req.category.as_deref(),
        subject: req.subject.trim(),
        message: &req.message,
    };
    state
        .mailer
        .send(contact_mail(&state.config.mail.contact_inbox, &message))
        .await?;

    info!("contact form forwarded");
    Ok(ApiResponse::ok(MessageBody::new("Email sent successfully")))
}
