use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

use crate::error::{Error, Result};
use crate::parse::{MailConfig, ProgramConfig};
use crate::runtime::ExitRecord;

/// RFC 1123 with a numeric zone, e.g. `Mon, 19 Oct 2026 14:03:07 +0200`.
pub const RFC1123Z: &str = "%a, %d %b %Y %H:%M:%S %z";

const PROGRAM_NAME_TOKEN: &str = "$program_name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

/// Delivers an alert somewhere.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

pub fn render_subject(template: &str, program_name: &str) -> String {
    template.replace(PROGRAM_NAME_TOKEN, program_name)
}

pub fn render_body(record: &ExitRecord) -> String {
    format!(
        "ExitCode: {}\nStartTime: {}\nExitTime: {}\nRetry: {}\nRestart: {}\n",
        record.exit_code,
        record.start_time.format(RFC1123Z),
        record.exit_time.format(RFC1123Z),
        record.retry,
        record.restart,
    )
}

#[derive(Clone)]
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    program_name: String,
    subject: String,
}

impl AlertDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        program_name: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            program_name: program_name.into(),
            subject: subject.into(),
        }
    }

    /// An SMTP-backed dispatcher when `mail_alert` is on, `None` otherwise.
    pub fn from_config(cfg: &ProgramConfig) -> Result<Option<Self>> {
        let Some(mail) = &cfg.mail else {
            return Ok(None);
        };
        let notifier = SmtpNotifier::new(mail)?;
        Ok(Some(Self::new(
            Arc::new(notifier),
            cfg.process_name.clone(),
            mail.subject.clone(),
        )))
    }

    pub fn compose(&self, record: &ExitRecord) -> Alert {
        Alert {
            subject: render_subject(&self.subject, &self.program_name),
            body: render_body(record),
        }
    }

    /*
        @@@
        @dispatch();
        . Builds the alert and delivers it on its own task, the caller never waits on the network.
        . A delivery failure is logged once and swallowed.
    */
    pub fn dispatch(&self, record: ExitRecord) -> JoinHandle<()> {
        let alert = self.compose(&record);
        let notifier = self.notifier.clone();
        let program = self.program_name.clone();
        tokio::spawn(async move {
            match notifier.notify(&alert).await {
                Ok(()) => info!(
                    program = %program,
                    exit_code = record.exit_code,
                    "sent unexpected exit notification"
                ),
                Err(e) => error!(
                    program = %program,
                    exit_code = record.exit_code,
                    "[mini-supervisor] send unexpected exit notification fail: {e}"
                ),
            }
        }
        .in_current_span())
    }
}

/// Sends alerts as plain-text mail, upgrading to TLS when the server offers STARTTLS.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    pub fn new(mail: &MailConfig) -> Result<Self> {
        let from = parse_mailbox("mail_sender", &mail.sender)?;
        let to = mail
            .receivers
            .iter()
            .map(|r| parse_mailbox("mail_receivers", r))
            .collect::<Result<Vec<_>>>()?;

        let tls = TlsParameters::new(mail.host.clone())
            .map_err(|e| Error::BadConfig(format!("mail_server {}: {e}", mail.host)))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(mail.host.as_str())
            .port(mail.port)
            .tls(Tls::Opportunistic(tls));
        if let Some(username) = &mail.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                mail.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let mut message = Message::builder()
            .from(self.from.clone())
            .subject(alert.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            message = message.to(to.clone());
        }
        let message = message
            .body(alert.body.clone())
            .map_err(|e| Error::AlertDelivery(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::AlertDelivery(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(key: &str, address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::BadConfig(format!("{key} {address:?}: {e}")))
}
