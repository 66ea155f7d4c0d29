//! Email service for verification and password reset messages

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::{str::FromStr, sync::Arc};

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

/// A rendered message ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Delivery backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()>;
}

/// SMTP delivery through lettre
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, email: &OutgoingEmail) -> AppResult<Message> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Bookshelf");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Email(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(&email.to)
            .map_err(|e| AppError::Email(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| AppError::Email(format!("Failed to build email: {}", e)))
    }

    fn transport(&self) -> AppResult<SmtpTransport> {
        let mailer_builder = if self.config.smtp_use_tls {
            // Use STARTTLS for secure connection
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Email(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer_builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        Ok(mailer_builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        let message = self.build_message(&email)?;
        let transport = self.transport()?;

        // lettre's SmtpTransport blocks on network I/O
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| AppError::Internal(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Email(format!("Failed to send email: {}", e)))?;

        tracing::info!("Sent \"{}\" to {}", email.subject, email.to);
        Ok(())
    }
}

/// Development backend: records that a message would have been sent.
///
/// The body carries one-time links, so only the envelope is logged.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email delivery disabled, message not sent"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct EmailService {
    mailer: Arc<dyn Mailer>,
    frontend_url: String,
}

impl EmailService {
    pub fn new(mailer: Arc<dyn Mailer>, frontend_url: &str) -> Self {
        Self {
            mailer,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// Pick the backend from configuration
    pub fn from_config(config: &EmailConfig, frontend_url: &str) -> Self {
        let mailer: Arc<dyn Mailer> = if config.enabled {
            Arc::new(SmtpMailer::new(config.clone()))
        } else {
            Arc::new(LogMailer)
        };
        Self::new(mailer, frontend_url)
    }

    pub fn verification_link(&self, user_id: i32, token: &str) -> String {
        format!("{}/verify-email?id={}&token={}", self.frontend_url, user_id, token)
    }

    pub fn reset_link(&self, user_id: i32, token: &str) -> String {
        format!("{}/reset-password?id={}&token={}", self.frontend_url, user_id, token)
    }

    /// Send the email-verification link
    pub async fn send_verification(&self, to: &str, user_id: i32, token: &str) -> AppResult<()> {
        let link = self.verification_link(user_id, token);
        self.mailer
            .send(OutgoingEmail {
                to: to.to_string(),
                subject: "Please verify your email".to_string(),
                text: format!("Click to verify: {}", link),
                html: render_html(
                    "Please verify your email",
                    "Thank you for signing up. Please verify your email to activate your account.",
                    Some(("Verify Email", &link)),
                ),
            })
            .await
    }

    /// Send the password-reset link
    pub async fn send_password_reset(&self, to: &str, user_id: i32, token: &str) -> AppResult<()> {
        let link = self.reset_link(user_id, token);
        self.mailer
            .send(OutgoingEmail {
                to: to.to_string(),
                subject: "Reset your password".to_string(),
                text: format!("Click to reset your password: {}", link),
                html: render_html(
                    "Reset your password",
                    "We received a request to reset your password. The link expires soon.",
                    Some(("Reset Password", &link)),
                ),
            })
            .await
    }
}

/// Minimal HTML layout shared by all messages
fn render_html(title: &str, message: &str, button: Option<(&str, &str)>) -> String {
    let button = button
        .map(|(text, url)| {
            format!(
                r#"<p style="text-align:center"><a href="{url}" style="background:#212121;color:#fff;padding:12px 24px;border-radius:6px;text-decoration:none">{text}</a></p>"#
            )
        })
        .unwrap_or_default();

    format!(
        r#"<html><body style="font-family:Arial,sans-serif">
<h1>{title}</h1>
<p>{message}</p>
{button}
<p style="color:#666">If you didn't request this, you can safely ignore this email.</p>
<p style="color:#888;font-size:12px">&copy; {year} Bookshelf</p>
</body></html>"#,
        year = Utc::now().year()
    )
}
