//! Outbound email: one trait, an HTTP API backend, and a log-only backend
//! for development when no mail API is configured.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MailConfig;
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), AppError>;
}

/// Builds the configured backend.
pub fn from_config(config: &MailConfig) -> Result<std::sync::Arc<dyn Mailer>, AppError> {
    match &config.api_url {
        Some(url) => Ok(std::sync::Arc::new(HttpMailer::new(
            url.clone(),
            config.api_key.clone(),
            config.from.clone(),
        )?)),
        None => {
            warn!("MAIL_API_URL not set; outgoing mail will only be logged");
            Ok(std::sync::Arc::new(LogMailer))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backends
// ────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MailApiRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    mail: &'a OutgoingMail,
}

/// Posts messages as JSON to a transactional mail API.
pub struct HttpMailer {
    client: Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(url: String, api_key: Option<String>, from: String) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Mail(format!("failed to build mail client: {e}")))?;
        Ok(Self {
            client,
            url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), AppError> {
        let mut request = self.client.post(&self.url).json(&MailApiRequest {
            from: &self.from,
            mail: &mail,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Mail(format!("mail API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!("mail API returned {status}: {body}")));
        }

        info!(to = %mail.to, subject = %mail.subject, "Email sent");
        Ok(())
    }
}

/// Logs recipient and subject only. Bodies carry tokens and are never logged.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), AppError> {
        info!(to = %mail.to, subject = %mail.subject, "Email delivery skipped (log mailer)");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Templates
// ────────────────────────────────────────────────────────────────────────────

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn verification_mail(to: &str, client_url: &str, raw_token: &str) -> OutgoingMail {
    let url = format!("{client_url}/verify-email?token={raw_token}");
    OutgoingMail {
        to: to.to_string(),
        subject: "Verifikasi Email Anda".to_string(),
        html: format!(
            r#"<div style="font-family: Arial, sans-serif; line-height: 1.6;">
  <h2>Selamat bergabung di Solid CV Review!</h2>
  <p>Untuk mulai menggunakan semua fitur, silakan verifikasi email Anda.</p>
  <p><a href="{url}">Verifikasi Email</a></p>
  <p>Jika tombol tidak berfungsi, salin dan tempel tautan berikut di browser Anda:</p>
  <p>{url}</p>
</div>"#
        ),
        text: format!("Verifikasi email Anda melalui tautan berikut: {url}"),
        reply_to: None,
    }
}

pub fn password_reset_mail(to: &str, client_url: &str, raw_token: &str) -> OutgoingMail {
    let url = format!("{client_url}/reset-password/{raw_token}");
    OutgoingMail {
        to: to.to_string(),
        subject: "Your Password Reset Token".to_string(),
        html: format!(
            r#"<div style="font-family: Arial, sans-serif; line-height: 1.6;">
  <h2>Password Reset Request</h2>
  <p>You are receiving this email because you (or someone else) requested a password reset for your account.</p>
  <p><a href="{url}">Reset Password</a></p>
  <p>If you did not request a password reset, please ignore this email.</p>
  <p>This link will expire in 10 minutes.</p>
  <p>{url}</p>
</div>"#
        ),
        text: format!("Reset your password within 10 minutes: {url}"),
        reply_to: None,
    }
}

/// A contact form submission forwarded to the support inbox.
#[derive(Debug, Clone)]
pub struct ContactMessage<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub category: Option<&'a str>,
    pub subject: &'a str,
    pub message: &'a str,
}

pub fn contact_mail(inbox: &str, msg: &ContactMessage<'_>) -> OutgoingMail {
    let category = msg.category.filter(|c| !c.trim().is_empty());
    let subject = match category {
        Some(c) => format!("[Contact Form] [{c}] {}", msg.subject),
        None => format!("[Contact Form] {}", msg.subject),
    };
    let category = category.unwrap_or("General");

    OutgoingMail {
        to: inbox.to_string(),
        subject,
        text: format!(
            "Name: {}\nEmail: {}\nCategory: {category}\nSubject: {}\n\nMessage:\n{}",
            msg.name, msg.email, msg.subject, msg.message
        ),
        html: format!(
            "<h3>New Contact Form Submission</h3>\n\
             <p><strong>Name:</strong> {}</p>\n\
             <p><strong>Email:</strong> {}</p>\n\
             <p><strong>Category:</strong> {}</p>\n\
             <p><strong>Subject:</strong> {}</p>\n<hr />\n\
             <p style=\"white-space: pre-wrap;\">{}</p>",
            escape_html(msg.name),
            escape_html(msg.email),
            escape_html(category),
            escape_html(msg.subject),
            escape_html(msg.message)
        ),
        reply_to: Some(msg.email.to_string()),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Test double
// ────────────────────────────────────────────────────────────────────────────
