use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::MailConfig;
use crate::error::{CronbeatError, Result};
use crate::notify::Message;

/// SMTP sender for the mail channel. Delivery is synchronous within the
/// dispatcher loop.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let from: Mailbox = if config.nickname.is_empty() {
            config.from.parse()
        } else {
            format!("{} <{}>", config.nickname, config.from).parse()
        }
        .map_err(|err: lettre::address::AddressError| {
            CronbeatError::Handler(format!("bad mail sender address: {err}"))
        })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|err| CronbeatError::Handler(format!("smtp relay: {err}")))?;
        if config.port != 0 {
            builder = builder.port(config.port);
        }
        if !config.secret.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.from.clone(),
                config.secret.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Send one message to every resolvable recipient. Failures are
    /// logged and dropped.
    pub async fn send(&self, message: &Message) {
        let mut builder = lettre::Message::builder().from(self.from.clone());
        let mut recipients = 0;
        for to in &message.to {
            match to.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    recipients += 1;
                }
                Err(err) => {
                    tracing::warn!(to, error = %err, "bad mail recipient, skipping");
                }
            }
        }
        if recipients == 0 {
            tracing::debug!(subject = %message.subject, "no resolvable mail recipients");
            return;
        }

        let email = match builder
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(render_body(message))
        {
            Ok(email) => email,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build mail message");
                return;
            }
        };

        if let Err(err) = self.transport.send(email).await {
            tracing::warn!(subject = %message.subject, error = %err, "smtp send failed");
        }
    }
}

fn render_body(message: &Message) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"/></head>
<body>
<div style="border: 2px solid black; background-color: whitesmoke; padding: 25px;">
  <div style="text-align: center; color: #FF3333; font-size: 18px; font-weight: bolder;">
    {subject}
  </div>
  <br>
  <table border="1" cellspacing="0" cellpadding="4" style="margin: 0 auto;">
    <tr><td>host</td><td>{ip}</td></tr>
    <tr><td>time</td><td>{time}</td></tr>
    <tr><td>detail</td><td>{body}</td></tr>
  </table>
</div>
</body>
</html>
"#,
        subject = message.subject,
        ip = message.ip,
        time = message.occur_time,
        body = message.body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NotifyChannel;

    #[test]
    fn body_template_carries_message_fields() {
        let msg = Message {
            channel: NotifyChannel::Mail,
            ip: "10.1.2.3:77".to_string(),
            subject: "job [backup] execution failed".to_string(),
            body: "exit status Some(1)".to_string(),
            to: vec![],
            occur_time: "2026-08-08 10:00:00".to_string(),
        };
        let html = render_body(&msg);
        assert!(html.contains("job [backup] execution failed"));
        assert!(html.contains("10.1.2.3:77"));
        assert!(html.contains("2026-08-08 10:00:00"));
        assert!(html.contains("exit status Some(1)"));
    }
}
