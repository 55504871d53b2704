//! `lettre`-backed SMTP transport used by the negotiator.

use crate::delivery::negotiator::{
    AddressFamily, AuthMethod, ConnectionParams, MailTransport, SmtpConnector,
};
use crate::mail::OutgoingMail;
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::net::SocketAddr;
use tokio::time::timeout;

/// Connects with `lettre` over tokio.
#[derive(Clone, Copy, Debug, Default)]
pub struct LettreConnector;

pub struct LettreTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl From<AuthMethod> for Mechanism {
    fn from(method: AuthMethod) -> Self {
        match method {
            AuthMethod::Plain => Mechanism::Plain,
            AuthMethod::Login => Mechanism::Login,
        }
    }
}

impl LettreConnector {
    /// Resolves the host to an address of the preferred family.
    ///
    /// Without a preference the hostname is handed to `lettre` untouched.
    async fn server_for(
        host: &str,
        port: u16,
        family: Option<AddressFamily>,
    ) -> Result<String, String> {
        let Some(family) = family else {
            return Ok(host.to_string());
        };

        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| format!("could not resolve {host}: {e}"))?;

        addrs
            .map(|addr: SocketAddr| addr.ip())
            .find(|ip| match family {
                AddressFamily::V4 => ip.is_ipv4(),
                AddressFamily::V6 => ip.is_ipv6(),
            })
            .map(|ip| ip.to_string())
            .ok_or_else(|| format!("{host} has no {family:?} address"))
    }

    fn build(params: &ConnectionParams, server: &str) -> Result<LettreTransport, String> {
        let config = &params.transport;
        // Certificates are checked against the configured name even when
        // connecting to a resolved address.
        let tls_parameters = TlsParameters::builder(config.host.clone())
            .dangerous_accept_invalid_certs(params.accept_invalid_certs)
            .dangerous_accept_invalid_hostnames(params.accept_invalid_certs)
            .build()
            .map_err(|e| format!("invalid TLS parameters: {e}"))?;

        let tls = if config.secure {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Opportunistic(tls_parameters)
        };

        let inner = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server)
            .port(config.port)
            .tls(tls)
            .credentials(Credentials::new(
                params.credentials.user.clone(),
                params.credentials.pass.clone(),
            ))
            .authentication(vec![params.method.into()])
            .timeout(Some(params.socket_timeout))
            .build();

        Ok(LettreTransport { inner })
    }
}

#[async_trait]
impl SmtpConnector for LettreConnector {
    type Transport = LettreTransport;

    async fn verify(&self, params: ConnectionParams) -> Result<Self::Transport, String> {
        let config = &params.transport;
        let server = Self::server_for(&config.host, config.port, params.address_family).await?;
        let transport = Self::build(&params, &server)?;

        match timeout(params.connection_timeout, transport.inner.test_connection()).await {
            Ok(Ok(true)) => Ok(transport),
            Ok(Ok(false)) => Err("server did not answer NOOP".to_string()),
            Ok(Err(e)) => Err(describe_smtp_error(&e)),
            Err(_) => Err(format!(
                "timed out after {}ms",
                params.connection_timeout.as_millis()
            )),
        }
    }
}

#[async_trait]
impl MailTransport for LettreTransport {
    async fn send(&self, prepared: &PreparedMessage) -> Result<(), String> {
        self.inner
            .send(prepared.message.clone())
            .await
            .map(|_| ())
            .map_err(|e| describe_smtp_error(&e))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("invalid sender address {address:?}: {reason}")]
    Sender { address: String, reason: String },
    #[error("invalid recipient address {address:?}: {reason}")]
    Recipient { address: String, reason: String },
    #[error("invalid reply-to address {address:?}: {reason}")]
    ReplyTo { address: String, reason: String },
    #[error("could not build message: {0}")]
    Build(String),
}

/// A rendered mail and its MIME form, built before any connection is made.
#[derive(Clone)]
pub struct PreparedMessage {
    pub mail: OutgoingMail,
    message: Message,
}

impl PreparedMessage {
    pub fn new(mail: OutgoingMail) -> Result<Self, MessageError> {
        let message = build_message(&mail)?;
        Ok(Self { mail, message })
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// Builds the MIME message. The envelope sender is the bare sender address,
/// separate from the display `From` header.
pub fn build_message(mail: &OutgoingMail) -> Result<Message, MessageError> {
    let from_address = mail
        .from_address
        .parse::<Address>()
        .map_err(|e| MessageError::Sender {
            address: mail.from_address.clone(),
            reason: e.to_string(),
        })?;
    let recipients = mail
        .to
        .iter()
        .map(|to| {
            to.parse::<Address>().map_err(|e| MessageError::Recipient {
                address: to.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let reply_to = mail
        .reply_to
        .parse::<Mailbox>()
        .map_err(|e| MessageError::ReplyTo {
            address: mail.reply_to.clone(),
            reason: e.to_string(),
        })?;

    let envelope = Envelope::new(Some(from_address.clone()), recipients.clone())
        .map_err(|e| MessageError::Build(format!("invalid envelope: {e}")))?;

    let mut builder = Message::builder()
        .from(Mailbox::new(Some(mail.from_name.clone()), from_address))
        .reply_to(reply_to)
        .subject(mail.subject.clone())
        .envelope(envelope);
    for recipient in recipients {
        builder = builder.to(Mailbox::new(None, recipient));
    }

    builder
        .multipart(MultiPart::alternative_plain_html(
            mail.text.clone(),
            mail.html.clone(),
        ))
        .map_err(|e| MessageError::Build(e.to_string()))
}

fn describe_smtp_error(e: &lettre::transport::smtp::Error) -> String {
    match e.status() {
        Some(code) => format!("{e} (SMTP {code})"),
        None => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::negotiator::{SmtpCredentials, TransportConfig};
    use crate::testutils::FakeSmtpServer;
    use std::time::Duration;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from_name: "Salarcon Tech Contact".into(),
            from_address: "bot@example.com".into(),
            to: vec!["owner@example.com".into()],
            reply_to: "ana@example.com".into(),
            subject: "Nuevo mensaje de contacto: Ana Gomez".into(),
            text: "Nombre: Ana Gomez".into(),
            html: "<p>Ana Gomez</p>".into(),
        }
    }

    fn params(port: u16, pass: &str) -> ConnectionParams {
        ConnectionParams {
            transport: TransportConfig {
                host: "127.0.0.1".into(),
                port,
                secure: false,
            },
            method: AuthMethod::Plain,
            credentials: SmtpCredentials {
                user: "bot@example.com".into(),
                pass: pass.into(),
            },
            connection_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(5),
            accept_invalid_certs: false,
            address_family: None,
        }
    }

    #[test]
    fn test_build_message_headers() {
        let message = build_message(&mail()).unwrap();
        let envelope = message.envelope();
        assert_eq!(
            envelope.from().map(|a| a.to_string()).as_deref(),
            Some("bot@example.com")
        );
        assert_eq!(envelope.to().len(), 1);

        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Nuevo mensaje de contacto: Ana Gomez"));
        assert!(
            formatted
                .lines()
                .any(|l| l.starts_with("Reply-To:") && l.contains("ana@example.com"))
        );
        assert!(
            formatted
                .lines()
                .any(|l| l.starts_with("From:") && l.contains("<bot@example.com>"))
        );
    }

    #[test]
    fn test_build_message_rejects_bad_addresses() {
        let mut bad = mail();
        bad.to = vec!["not an address".into()];
        assert!(matches!(
            build_message(&bad),
            Err(MessageError::Recipient { .. })
        ));

        let mut bad = mail();
        bad.from_address = "bot at example.com".into();
        assert!(matches!(
            build_message(&bad),
            Err(MessageError::Sender { .. })
        ));
    }

    #[test]
    fn test_unparseable_reply_to_is_caught_before_connecting() {
        // All of these match the loose submission email pattern.
        for address in [
            "ana,b@example.com",
            "a(b)@example.com",
            "a\"b@example.com",
            "ana@example.com)",
            "ana@[x].com",
        ] {
            let mut bad = mail();
            bad.reply_to = address.into();
            let err = PreparedMessage::new(bad).err();
            assert!(
                matches!(err, Some(MessageError::ReplyTo { .. })),
                "{address}: {err:?}"
            );
        }
    }

    #[test]
    fn test_prepared_message_keeps_envelope() {
        let prepared = PreparedMessage::new(mail()).unwrap();
        assert_eq!(prepared.mail, mail());
        assert_eq!(prepared.message().envelope().to().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_and_send_against_local_server() {
        let server = FakeSmtpServer::start("hunter2").await;

        let transport = LettreConnector
            .verify(params(server.port, "hunter2"))
            .await
            .unwrap();
        let prepared = PreparedMessage::new(mail()).unwrap();
        transport.send(&prepared).await.unwrap();

        let delivered = server.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].mail_from, "bot@example.com");
        assert_eq!(delivered[0].rcpt_to, vec!["owner@example.com"]);
        assert!(
            delivered[0]
                .data
                .contains("Subject: Nuevo mensaje de contacto: Ana Gomez")
        );
    }

    #[tokio::test]
    async fn test_verify_reports_auth_rejection() {
        let server = FakeSmtpServer::start("hunter2").await;

        let err = LettreConnector
            .verify(params(server.port, "wrong"))
            .await
            .err()
            .unwrap();
        assert!(err.contains("535"), "{err}");
        assert!(server.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn test_verify_reports_connection_failure() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        assert!(LettreConnector.verify(params(port, "hunter2")).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_times_out_on_silent_server() {
        // Accepts connections but never sends the greeting.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let mut silent = params(port, "hunter2");
        silent.connection_timeout = Duration::from_millis(300);
        let start = std::time::Instant::now();

        let err = LettreConnector.verify(silent).await.err().unwrap();

        assert!(err.contains("timed out"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
