use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_reset_code(&self, to: &str, name: &str, code: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .credentials(creds)
            .build();
        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_reset_code(&self, to: &str, name: &str, code: &str) -> anyhow::Result<()> {
        let body = format!(
            "Hi {name},\n\n\
             Your Lab Desk password reset code is {code}. It is valid for 15 minutes.\n\n\
             If you did not request a reset, you can ignore this email.\n"
        );
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject("Lab Desk password reset code")
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;
        self.transport.send(email).await?;
        Ok(())
    }
}

/// Used when SMTP is unconfigured, and in tests.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_reset_code(&self, to: &str, _name: &str, _code: &str) -> anyhow::Result<()> {
        info!(to = %to, "reset code issued; mail delivery disabled");
        Ok(())
    }
}
