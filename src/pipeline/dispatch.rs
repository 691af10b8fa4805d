//! Mail dispatch over one authenticated SMTP connection.
//!
//! A run opens a single connection, authenticates once and sends every
//! message over it. The session is closed exactly once with `QUIT`, after
//! the last record, whether sends failed or not. A refused message is a
//! per-record [`RecordError::Dispatch`]; only connect and login failures are
//! fatal.
//!
//! The SMTP client drops the connection on any error reply, a refused
//! recipient included. The session then reconnects and logs in again before
//! the next message, so one bad address does not cost the rest of the batch.

use crate::config::MailProfile;
use crate::error::{BillError, RecordError};
use crate::pipeline::mail::OutgoingMessage;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An open, authenticated mail session.
#[async_trait]
pub trait MailSession: Send {
    /// Transmit one message. Never retried.
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), RecordError>;

    /// Release the connection. Calling it again does nothing.
    async fn close(&mut self);
}

/// Opens SMTP sessions for a [`MailProfile`].
#[derive(Debug, Clone)]
pub struct MailDispatcher<'a> {
    profile: &'a MailProfile,
}

impl<'a> MailDispatcher<'a> {
    pub fn new(profile: &'a MailProfile) -> Self {
        Self { profile }
    }

    /// Connect over implicit TLS and log in with `password`.
    pub async fn connect(&self, password: &str) -> Result<SmtpSession, BillError> {
        let tls = TlsParameters::new(self.profile.smtp_host.clone()).map_err(|e| {
            BillError::Connection {
                host: self.profile.smtp_host.clone(),
                port: self.profile.smtp_port,
                detail: format!("TLS setup: {e}"),
            }
        })?;
        self.connect_with(password, Some(tls)).await
    }

    /// Connect with explicit TLS parameters; `None` speaks plain SMTP, for a
    /// relay on the local machine.
    pub async fn connect_with(
        &self,
        password: &str,
        tls: Option<TlsParameters>,
    ) -> Result<SmtpSession, BillError> {
        let credentials = Credentials::new(self.profile.smtp_login.clone(), password.to_string());
        let connection = open_connection(self.profile, tls.clone(), &credentials).await?;
        let p = self.profile;
        info!("Logged in to {}:{} as {}", p.smtp_host, p.smtp_port, p.smtp_login);

        Ok(SmtpSession {
            connection: Some(connection),
            profile: p.clone(),
            credentials,
            tls,
            closed: false,
        })
    }
}

/// Connect, greet and authenticate.
async fn open_connection(
    p: &MailProfile,
    tls: Option<TlsParameters>,
    credentials: &Credentials,
) -> Result<AsyncSmtpConnection, BillError> {
    let hello = ClientId::Domain(p.hello_name.clone());
    let timeout = Some(Duration::from_secs(p.timeout_secs));

    debug!("Connecting to {}:{}", p.smtp_host, p.smtp_port);
    let mut connection = AsyncSmtpConnection::connect_tokio1(
        (p.smtp_host.as_str(), p.smtp_port),
        timeout,
        &hello,
        tls,
        None,
    )
    .await
    .map_err(|e| BillError::Connection {
        host: p.smtp_host.clone(),
        port: p.smtp_port,
        detail: e.to_string(),
    })?;

    if let Err(e) = connection
        .auth(&[Mechanism::Plain, Mechanism::Login], credentials)
        .await
    {
        connection.abort().await;
        return Err(BillError::Authentication {
            login: p.smtp_login.clone(),
            detail: e.to_string(),
        });
    }
    Ok(connection)
}

/// A live SMTP session.
pub struct SmtpSession {
    /// `None` after a failed reconnect or once closed.
    connection: Option<AsyncSmtpConnection>,
    profile: MailProfile,
    credentials: Credentials,
    tls: Option<TlsParameters>,
    closed: bool,
}

impl std::fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSession")
            .field("host", &self.profile.smtp_host)
            .field("port", &self.profile.smtp_port)
            .field("connected", &self.connection.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl SmtpSession {
    /// Replace a dropped connection with a fresh, authenticated one.
    async fn reconnect(&mut self) -> Result<(), BillError> {
        if let Some(mut old) = self.connection.take() {
            old.abort().await;
        }
        warn!(
            "Connection to {}:{} was dropped, reconnecting",
            self.profile.smtp_host, self.profile.smtp_port
        );
        let connection =
            open_connection(&self.profile, self.tls.clone(), &self.credentials).await?;
        info!("Reconnected to {}", self.profile.smtp_host);
        self.connection = Some(connection);
        Ok(())
    }
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), RecordError> {
        let fail = |detail: String| RecordError::Dispatch {
            recipient: message.recipient.clone(),
            detail,
        };
        if self.closed {
            return Err(fail("session already closed".into()));
        }

        let usable = self
            .connection
            .as_ref()
            .is_some_and(|c| !c.has_broken());
        if !usable {
            self.reconnect().await.map_err(|e| fail(e.to_string()))?;
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| fail("no connection".into()))?;

        let msg = message.message();
        connection
            .send(msg.envelope(), &msg.formatted())
            .await
            .map_err(|e| fail(e.to_string()))?;
        info!("Successfully sent email to {}", message.recipient);
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if connection.has_broken() {
            // QUIT already went out when the connection was dropped.
            connection.abort().await;
            return;
        }
        match connection.quit().await {
            Ok(_) => debug!("Closed SMTP session with {}", self.profile.smtp_host),
            Err(e) => {
                warn!("QUIT to {} failed: {}", self.profile.smtp_host, e);
                connection.abort().await;
            }
        }
    }
}
