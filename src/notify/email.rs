use async_trait::async_trait;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::debug;

use super::Notifier;
use crate::config::{EmailConfig, NotificationsConfig};
use crate::models::TenderRecord;
use crate::utils::error::NotifyError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Implicit TLS; every other port upgrades with STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Sends one multipart (text + HTML) digest per source and pass.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn parse_address(raw: &str) -> Result<Address, NotifyError> {
    raw.trim().parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: raw.to_string(),
        message: e.to_string(),
    })
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from = Mailbox::new(Some(config.from_name.clone()), parse_address(&config.from_address)?);
        let to = config
            .to
            .iter()
            .map(|raw| parse_address(raw).map(|address| Mailbox::new(None, address)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = match (config.use_tls, config.smtp_port) {
            (true, SMTPS_PORT) => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?,
            (true, _) => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?,
            (false, _) => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
        }
        .port(config.smtp_port)
        .timeout(Some(SMTP_TIMEOUT));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
        })
    }

    /// `None` when no `[notifications.email]` section is configured.
    pub fn from_config(config: &NotificationsConfig) -> Result<Option<Self>, NotifyError> {
        config.email.as_ref().map(Self::new).transpose()
    }

    pub fn format_subject(&self, source: &str, records: &[TenderRecord]) -> String {
        match records {
            [single] => format!("New tender from {}: {}", source, single.title),
            _ => format!("{} new tenders from {}", records.len(), source),
        }
    }

    pub fn format_text_body(&self, source: &str, records: &[TenderRecord]) -> String {
        let mut text = format!("NEW TENDERS FROM {}\n\n", source.to_uppercase());

        for record in records {
            text.push_str(&format!("{}\n", record.summary()));
            if let Some(buyer) = &record.buyer {
                text.push_str(&format!("Buyer: {}\n", buyer));
            }
            if let Some(category) = &record.category {
                text.push_str(&format!("Category: {}\n", category));
            }
            if let Some(description) = &record.description {
                text.push_str(&format!("{}\n", description));
            }
            text.push_str(&format!("Link: {}\n\n", record.url));
        }

        text
    }

    pub fn format_html_body(&self, source: &str, records: &[TenderRecord]) -> String {
        let mut html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .tender {{ margin: 12px 0; padding: 10px; border: 1px solid #eee; border-radius: 6px; }}
        .title {{ font-weight: 600; font-size: 16px; margin-bottom: 4px; }}
        .meta {{ color: #555; }}
    </style>
</head>
<body>
    <h2>{} new tender(s) from {}</h2>
"#,
            records.len(),
            escape_html(source)
        );

        for record in records {
            html.push_str(&format!(
                "    <div class=\"tender\">\n        <div class=\"title\">{}</div>\n",
                escape_html(&record.title)
            ));
            html.push_str(&format!(
                "        <div class=\"meta\">Reference: {}</div>\n",
                escape_html(&record.external_id)
            ));
            if let Some(deadline) = record.deadline {
                html.push_str(&format!(
                    "        <div class=\"meta\">Closes: {}</div>\n",
                    deadline.format("%d %b %Y %H:%M")
                ));
            }
            if let Some(buyer) = &record.buyer {
                html.push_str(&format!("        <div class=\"meta\">Buyer: {}</div>\n", escape_html(buyer)));
            }
            if let Some(description) = &record.description {
                html.push_str(&format!("        <p>{}</p>\n", escape_html(description)));
            }
            html.push_str(&format!(
                "        <a href=\"{}\">View tender</a>\n    </div>\n",
                escape_html(&record.url)
            ));
        }

        html.push_str("</body>\n</html>\n");
        html
    }

    pub fn build_message(&self, source: &str, records: &[TenderRecord]) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.format_subject(source, records));
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_PLAIN)
                        .body(self.format_text_body(source, records)),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_HTML)
                        .body(self.format_html_body(source, records)),
                ),
        )?;
        Ok(message)
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, source: &str, records: &[TenderRecord]) -> Result<(), NotifyError> {
        if records.is_empty() {
            return Ok(());
        }

        let message = self.build_message(source, records)?;
        let response = self.mailer.send(message).await?;
        debug!(code = %response.code(), recipients = self.to.len(), "E-mail accepted");
        Ok(())
    }
}
