//! services/mail_transport.rs
//! Capacidad de envío que usa el coordinador. Credenciales, reintentos de
//! protocolo y formato del proveedor quedan del lado del transporte.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use uuid::Uuid;

use crate::{config::scheduler_config::SmtpSettings, models::sender_model::SenderIdentity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
}

/// Clasificación cerrada de fallos del transporte.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Timeout, throttling temporal del proveedor, 4xx.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Destinatario inválido, hard bounce, 5xx.
    #[error("permanent transport error: {0}")]
    Permanent(String),

    /// El remitente no pudo autenticarse; se excluye por el resto de la pasada.
    #[error("sender authentication failed: {0}")]
    SenderAuth(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        from: &SenderIdentity,
        email: &OutgoingEmail,
    ) -> Result<SentMessage, TransportError>;
}

/// Message-ID propio, para poder guardarlo aunque el relay no lo devuelva.
pub fn generate_message_id(sender_email: &str) -> String {
    let domain = sender_email
        .rsplit_once('@')
        .map(|(_, d)| d)
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("{}@{}", Uuid::new_v4(), domain)
}

/// No envía nada: registra el mensaje y devuelve un id generado.
#[derive(Debug, Clone, Default)]
pub struct DryRunTransport;

#[async_trait]
impl MailTransport for DryRunTransport {
    async fn send(
        &self,
        from: &SenderIdentity,
        email: &OutgoingEmail,
    ) -> Result<SentMessage, TransportError> {
        let message_id = generate_message_id(&from.email);
        log::info!(
            "(dry_run) from={} to={} subject='{}' message_id={}",
            from.email,
            email.to,
            email.subject,
            message_id
        );
        Ok(SentMessage { message_id })
    }
}

/// Envío por relay SMTP con lettre. El From es el buzón del remitente rotado.
#[derive(Clone)]
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

impl SmtpMailTransport {
    pub fn new(settings: &SmtpSettings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
            .port(settings.port)
            .timeout(Some(timeout));
        if !settings.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.user.clone(),
                settings.pass.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            timeout,
        })
    }

    fn build_message(
        from: &SenderIdentity,
        email: &OutgoingEmail,
        message_id: &str,
    ) -> Result<Message, TransportError> {
        // Un From inválido es problema de configuración del remitente.
        let from_box: Mailbox = from
            .mailbox()
            .parse()
            .map_err(|e| TransportError::SenderAuth(format!("Invalid from address: {e}")))?;
        let to_box: Mailbox = email
            .to
            .parse()
            .map_err(|e| TransportError::Permanent(format!("Invalid recipient address: {e}")))?;

        Message::builder()
            .from(from_box.clone())
            .reply_to(from_box)
            .to(to_box)
            .subject(email.subject.clone())
            .message_id(Some(format!("<{message_id}>")))
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| TransportError::Permanent(format!("Invalid message: {e}")))
    }
}

/// 535/534/530: credenciales; resto por severidad de la respuesta.
pub fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> TransportError {
    let code = err.status().map(|c| c.to_string());
    let detail = err.to_string();

    if matches!(code.as_deref(), Some("535") | Some("534") | Some("530")) {
        return TransportError::SenderAuth(detail);
    }
    if err.is_timeout() || err.is_transient() {
        return TransportError::Transient(detail);
    }
    if err.is_permanent() {
        return TransportError::Permanent(detail);
    }
    // Errores de conexión/TLS: se reintentan en la próxima pasada.
    TransportError::Transient(detail)
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(
        &self,
        from: &SenderIdentity,
        email: &OutgoingEmail,
    ) -> Result<SentMessage, TransportError> {
        let message_id = generate_message_id(&from.email);
        let message = Self::build_message(from, email, &message_id)?;

        match tokio::time::timeout(self.timeout, self.mailer.send(message)).await {
            Ok(Ok(_response)) => Ok(SentMessage { message_id }),
            Ok(Err(e)) => Err(classify_smtp_error(&e)),
            Err(_) => Err(TransportError::Transient(format!(
                "SMTP send timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
