use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::ensure_success;
use crate::error::Result;
use crate::models::User;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

/// Resend delivery; without an API key messages are only logged
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: Option<String>,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: Option<String>, from: &str, http: reqwest::Client) -> Self {
        if api_key.is_none() {
            tracing::warn!("RESEND_API_KEY not set, outgoing email is disabled");
        }
        Self {
            http,
            api_key,
            from: from.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        let Some(api_key) = &self.api_key else {
            tracing::info!("Email delivery disabled, dropping '{}'", message.subject);
            return Ok(());
        };

        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&ResendEmail {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await?;
        ensure_success("Resend", response).await?;

        tracing::info!("Sent email '{}'", message.subject);
        Ok(())
    }
}

/// Deliver without blocking the request; failures are logged only
pub fn send_in_background(mailer: Arc<dyn Mailer>, message: Option<EmailMessage>) {
    let Some(message) = message else {
        return;
    };

    tokio::spawn(async move {
        let subject = message.subject.clone();
        if let Err(e) = mailer.send(message).await {
            tracing::error!("Failed to send email '{}': {}", subject, e);
        }
    });
}

// =============================================================================
// Templates
// =============================================================================

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn greeting(user: &User) -> String {
    let name = user
        .display_name
        .as_deref()
        .or(user.username.as_deref())
        .unwrap_or("reader");
    format!("Hi {},", escape_html(name))
}

/// Returns `None` when the user has no email address
pub fn welcome_email(user: &User, app_url: &str) -> Option<EmailMessage> {
    let to = user.email.clone()?;
    Some(EmailMessage {
        to,
        subject: "Welcome to Echo Reads".to_string(),
        html: format!(
            "<p>{}</p><p>Your library is ready. Start by adding the book you're reading right now.</p>\
             <p><a href=\"{}/library\">Open your library</a></p>",
            greeting(user),
            app_url
        ),
    })
}

pub fn payment_failed_email(
    user: &User,
    app_url: &str,
    invoice_url: Option<&str>,
) -> Option<EmailMessage> {
    let to = user.email.clone()?;
    let link = invoice_url
        .map(str::to_string)
        .unwrap_or_else(|| format!("{app_url}/settings/billing"));
    Some(EmailMessage {
        to,
        subject: "Your Echo Reads payment failed".to_string(),
        html: format!(
            "<p>{}</p><p>We couldn't process your latest Premium payment. \
             Please update your payment details to keep your collections.</p>\
             <p><a href=\"{}\">Update payment</a></p>",
            greeting(user),
            escape_html(&link)
        ),
    })
}

pub fn subscription_canceled_email(user: &User, app_url: &str) -> Option<EmailMessage> {
    let to = user.email.clone()?;
    Some(EmailMessage {
        to,
        subject: "Your Echo Reads Premium subscription has ended".to_string(),
        html: format!(
            "<p>{}</p><p>Your Premium subscription has ended and your account is back on the free plan. \
             Your library and reviews are untouched.</p>\
             <p><a href=\"{}/pricing\">Resubscribe</a></p>",
            greeting(user),
            app_url
        ),
    })
}
