use async_trait::async_trait;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Write as _;
use tracing::info;

use crate::config::SmtpConfig;
use crate::models::{LineOutcome, RunStatus, RunSummary};
use crate::plugins::traits::NotifierPlugin;
use crate::utils::error::AppError;
use crate::Result;

fn plugin_error(message: impl Into<String>) -> AppError {
    AppError::Plugin {
        plugin_type: "email".to_string(),
        message: message.into(),
    }
}

/// Mails the run summary over SMTP as plain text plus HTML.
pub struct EmailNotifier {
    config: SmtpConfig,
    cart_url: String,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig, cart_url: impl Into<String>) -> Result<Self> {
        let to_address = config
            .to_address
            .as_deref()
            .ok_or_else(|| plugin_error("no recipient configured"))?;
        let from_address = config
            .from_address
            .as_deref()
            .or(config.username.as_deref())
            .ok_or_else(|| plugin_error("no sender address configured"))?;

        let from = format!("{} <{}>", config.from_name, from_address)
            .parse()
            .map_err(|e| plugin_error(format!("invalid sender address: {}", e)))?;
        let to = to_address
            .parse()
            .map_err(|e| plugin_error(format!("invalid recipient address: {}", e)))?;

        Ok(Self {
            config,
            cart_url: cart_url.into(),
            from,
            to,
        })
    }

    fn format_subject(&self, summary: &RunSummary) -> String {
        let state = summary.final_state();
        match summary.status() {
            RunStatus::Success => format!("Cart ready: {} {} - please check out", state.total, state.currency),
            RunStatus::Partial => format!(
                "Cart partially filled: {} {} - needs attention",
                state.total, state.currency
            ),
            RunStatus::Aborted => "Shopping run aborted".to_string(),
        }
    }

    fn format_text_body(&self, summary: &RunSummary) -> String {
        let state = summary.final_state();
        let mut text = String::new();

        let _ = writeln!(text, "Shopping run {} finished: {}", summary.run_id(), summary.status());
        let _ = writeln!(text, "Completed: {}", summary.completed_at().format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(text, "Cart total: {} {}", state.total, state.currency);
        let _ = writeln!(
            text,
            "Lines added: {}, failed: {}",
            state.lines_added, state.lines_failed
        );
        if let Some(reason) = summary.reason() {
            let _ = writeln!(text, "Reason: {}", reason);
        }

        let failed: Vec<_> = summary.failed().collect();
        if !failed.is_empty() {
            text.push_str("\nCould not add:\n");
            for line in failed {
                let _ = writeln!(
                    text,
                    "- {} ({}): {}",
                    line.title,
                    line.product_id,
                    line.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if !summary.warnings().is_empty() {
            text.push_str("\nWarnings:\n");
            for warning in summary.warnings() {
                let _ = writeln!(text, "- {}", warning);
            }
        }

        if summary.status() != RunStatus::Aborted {
            let _ = write!(text, "\nReview and pay: {}\n", self.cart_url);
        }
        text
    }

    fn format_html_body(&self, summary: &RunSummary) -> String {
        let state = summary.final_state();
        let mut html = String::from(
            "<!DOCTYPE html>\n<html>\n<head>\n<style>\n\
             body { font-family: Arial, sans-serif; margin: 20px; }\n\
             .header { background: #f0f0f0; padding: 15px; border-radius: 5px; }\n\
             .added { color: #2e7d32; }\n\
             .failed { color: #c62828; }\n\
             td { padding: 4px 10px; }\n\
             </style>\n</head>\n<body>\n",
        );

        let _ = write!(
            html,
            "<div class=\"header\"><h2>Shopping run: {}</h2>\
             <p><strong>Cart total:</strong> {} {}</p>",
            summary.status(),
            state.total,
            state.currency
        );
        if let Some(reason) = summary.reason() {
            let _ = write!(html, "<p><strong>Reason:</strong> {}</p>", escape(reason));
        }
        html.push_str("</div>\n<table>\n");

        for line in summary.lines() {
            let (class, label) = match line.outcome {
                LineOutcome::Added => ("added", "added"),
                LineOutcome::Failed => ("failed", "failed"),
                LineOutcome::SkippedDuplicate => ("", "skipped"),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>x{}</td><td class=\"{}\">{}</td><td>{}</td></tr>",
                escape(&line.title),
                line.quantity,
                class,
                label,
                escape(line.failure_reason.as_deref().unwrap_or(""))
            );
        }
        html.push_str("</table>\n");

        if summary.status() != RunStatus::Aborted {
            let _ = write!(
                html,
                "<p><a href=\"{url}\">{url}</a></p>\n",
                url = escape(&self.cart_url)
            );
        }
        html.push_str("</body>\n</html>\n");
        html
    }

    fn build_message(&self, summary: &RunSummary) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(self.format_subject(summary))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(self.format_text_body(summary)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(self.format_html_body(summary)),
                    ),
            )
            .map_err(|e| plugin_error(format!("could not build message: {}", e)))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .map_err(|e| plugin_error(format!("invalid SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };
        let builder = builder.port(self.config.port);

        let builder = match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };
        Ok(builder.build())
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl NotifierPlugin for EmailNotifier {
    fn name(&self) -> &str {
        "Email Notifier"
    }

    fn plugin_type(&self) -> &str {
        "email"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let message = self.build_message(summary)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| plugin_error(format!("SMTP delivery failed: {}", e)))?;
        info!(to = %self.to, status = %summary.status(), "Sent run summary email");
        Ok(())
    }
}
