use crate::delivery::negotiator::{
    AuthMethod, ConnectionParams, MailTransport, NegotiationOptions, SmtpConnector,
    SmtpCredentials, TransportConfig,
};
use crate::delivery::smtp::PreparedMessage;
use crate::mail::OutgoingMail;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub fn negotiation_options(methods: &[AuthMethod]) -> NegotiationOptions {
    NegotiationOptions {
        credentials: SmtpCredentials {
            user: "bot@example.com".into(),
            pass: "hunter2".into(),
        },
        methods: methods.to_vec(),
        connection_timeout: Duration::from_secs(1),
        socket_timeout: Duration::from_secs(1),
        accept_invalid_certs: false,
        address_family: None,
    }
}

/// Connector that accepts exactly one (config, method) pair and records
/// every verification and send.
#[derive(Clone, Default)]
pub struct FakeConnector {
    accept: Option<(TransportConfig, AuthMethod)>,
    fail_send: bool,
    verify_calls: Arc<Mutex<Vec<ConnectionParams>>>,
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
}

impl FakeConnector {
    pub fn failing_all() -> Self {
        Self::default()
    }

    pub fn succeeding_on(config: TransportConfig, method: AuthMethod) -> Self {
        Self {
            accept: Some((config, method)),
            ..Self::default()
        }
    }

    /// Verification succeeds but the send fails.
    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn verify_calls(&self) -> Vec<ConnectionParams> {
        self.verify_calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

pub struct FakeTransport {
    pub config: TransportConfig,
    fail_send: bool,
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
}

#[async_trait]
impl SmtpConnector for FakeConnector {
    type Transport = FakeTransport;

    async fn verify(&self, params: ConnectionParams) -> Result<Self::Transport, String> {
        self.verify_calls.lock().unwrap().push(params.clone());

        match &self.accept {
            Some((config, method)) if *config == params.transport && *method == params.method => {
                Ok(FakeTransport {
                    config: params.transport,
                    fail_send: self.fail_send,
                    sent: self.sent.clone(),
                })
            }
            _ => Err(format!(
                "refused {} auth {}",
                params.transport, params.method
            )),
        }
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn send(&self, prepared: &PreparedMessage) -> Result<(), String> {
        if self.fail_send {
            return Err("550 mailbox unavailable".into());
        }
        self.sent.lock().unwrap().push(prepared.mail.clone());
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeliveredMessage {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub data: String,
}

/// Minimal plaintext SMTP server on 127.0.0.1 accepting AUTH PLAIN for
/// `bot@example.com` with the given password.
pub struct FakeSmtpServer {
    pub port: u16,
    delivered: Arc<tokio::sync::Mutex<Vec<DeliveredMessage>>>,
}

impl FakeSmtpServer {
    pub async fn start(password: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let delivered = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let expected = format!("\0bot@example.com\0{password}");

        let store = delivered.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let store = store.clone();
                let expected = expected.clone();
                tokio::spawn(async move {
                    let _ = serve_session(stream, &expected, store).await;
                });
            }
        });

        Self { port, delivered }
    }

    pub async fn delivered(&self) -> Vec<DeliveredMessage> {
        self.delivered.lock().await.clone()
    }
}

async fn serve_session(
    stream: tokio::net::TcpStream,
    expected_auth: &str,
    store: Arc<tokio::sync::Mutex<Vec<DeliveredMessage>>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut current = DeliveredMessage::default();

    write.write_all(b"220 localhost ESMTP fake\r\n").await?;

    while let Some(line) = lines.next_line().await? {
        let upper = line.to_ascii_uppercase();
        let reply: &[u8] = if upper.starts_with("EHLO") {
            b"250-localhost\r\n250 AUTH PLAIN LOGIN\r\n"
        } else if let Some(payload) = line.strip_prefix("AUTH PLAIN ") {
            let decoded = STANDARD.decode(payload.trim()).unwrap_or_default();
            if decoded == expected_auth.as_bytes() {
                b"235 2.7.0 Authentication successful\r\n"
            } else {
                b"535 5.7.8 Authentication credentials invalid\r\n"
            }
        } else if upper.starts_with("AUTH") {
            b"504 5.5.4 Unrecognized authentication type\r\n"
        } else if upper.starts_with("MAIL FROM:") {
            current = DeliveredMessage {
                mail_from: angle_address(&line),
                ..DeliveredMessage::default()
            };
            b"250 2.1.0 OK\r\n"
        } else if upper.starts_with("RCPT TO:") {
            current.rcpt_to.push(angle_address(&line));
            b"250 2.1.5 OK\r\n"
        } else if upper == "DATA" {
            write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;
            while let Some(data_line) = lines.next_line().await? {
                if data_line == "." {
                    break;
                }
                current.data.push_str(&data_line);
                current.data.push('\n');
            }
            store.lock().await.push(std::mem::take(&mut current));
            b"250 2.0.0 Queued\r\n"
        } else if upper == "NOOP" || upper == "RSET" {
            b"250 2.0.0 OK\r\n"
        } else if upper == "QUIT" {
            write.write_all(b"221 2.0.0 Bye\r\n").await?;
            return Ok(());
        } else {
            b"502 5.5.2 Command not recognized\r\n"
        };
        write.write_all(reply).await?;
    }

    Ok(())
}

fn angle_address(line: &str) -> String {
    line.split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map(|(addr, _)| addr.to_string())
        .unwrap_or_default()
}
