//! SMTP connection negotiation.
//!
//! Operators frequently pair a port with the wrong security flag (465 with
//! STARTTLS, 587 with implicit TLS). Instead of failing outright, the
//! negotiator walks a short ladder of transport configurations derived from
//! the primary one and, for each, every allowed authentication method:
//!
//! 1. the primary configuration as given
//! 2. the primary host on the submission port (587) with STARTTLS
//! 3. the primary host on the SMTPS port (465) with implicit TLS
//!
//! The ladder and the methods are flattened into one ordered attempt plan.
//! Each attempt is verified (connect, EHLO, auth, NOOP) and the first one
//! that verifies wins; its transport is then used for the single send.

use crate::delivery::smtp::PreparedMessage;
use crate::metrics_defs::SMTP_VERIFY_ATTEMPTS;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Submission port, upgraded with STARTTLS.
pub const SUBMISSION_PORT: u16 = 587;
/// SMTPS port, TLS from connection start.
pub const SMTPS_PORT: u16 = 465;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.secure { "tls" } else { "starttls" };
        write!(f, "{}:{} ({mode})", self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Plain,
    Login,
}

impl AuthMethod {
    pub const PREFERENCE_ORDER: [AuthMethod; 2] = [AuthMethod::Plain, AuthMethod::Login];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(AuthMethod::Plain),
            "LOGIN" => Ok(AuthMethod::Login),
            _ => Err(()),
        }
    }
}

/// Preferred IP family when resolving the SMTP host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl FromStr for AddressFamily {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4" | "ipv4" => Ok(AddressFamily::V4),
            "6" | "ipv6" => Ok(AddressFamily::V6),
            _ => Err(()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub user: String,
    pub pass: String,
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Everything needed to build one transport handle.
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    pub transport: TransportConfig,
    pub method: AuthMethod,
    pub credentials: SmtpCredentials,
    pub connection_timeout: Duration,
    pub socket_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub address_family: Option<AddressFamily>,
}

/// Builds and verifies SMTP transports.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    type Transport: MailTransport;

    /// Builds a transport for `params` and runs the connectivity and auth
    /// check. Returns the verified transport, or the failure reason.
    async fn verify(&self, params: ConnectionParams) -> Result<Self::Transport, String>;
}

/// A verified transport able to send one message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, prepared: &PreparedMessage) -> Result<(), String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryAttemptResult {
    pub config: TransportConfig,
    pub method: AuthMethod,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for DeliveryAttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Success => write!(f, "{} auth {}: ok", self.config, self.method),
            AttemptOutcome::Failure(reason) => {
                write!(f, "{} auth {}: {reason}", self.config, self.method)
            }
        }
    }
}

/// Every (config, method) pair failed verification.
#[derive(thiserror::Error, Debug)]
#[error("could not establish an SMTP connection: {last_reason}")]
pub struct NegotiationExhausted {
    pub last_reason: String,
    pub hint: &'static str,
    pub attempts: Vec<DeliveryAttemptResult>,
}

pub const PIN_LOGIN_HINT: &str =
    "If the server only accepts LOGIN authentication, set SMTP_AUTH_METHOD=LOGIN.";
pub const CHECK_SETTINGS_HINT: &str =
    "Check SMTP_HOST, SMTP_PORT, SMTP_SECURE and the SMTP credentials.";

/// A verified transport plus the attempts it took to get there.
pub struct Negotiated<T> {
    pub transport: T,
    pub attempts: Vec<DeliveryAttemptResult>,
}

impl<T> fmt::Debug for Negotiated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Derives the fallback ladder from the primary configuration.
pub fn candidate_ladder(primary: &TransportConfig) -> Vec<TransportConfig> {
    vec![
        primary.clone(),
        TransportConfig {
            host: primary.host.clone(),
            port: SUBMISSION_PORT,
            secure: false,
        },
        TransportConfig {
            host: primary.host.clone(),
            port: SMTPS_PORT,
            secure: true,
        },
    ]
}

/// Flattens configurations and methods into the order attempts are made:
/// every method for the first configuration, then the next configuration.
pub fn attempt_plan(
    ladder: &[TransportConfig],
    methods: &[AuthMethod],
) -> Vec<(TransportConfig, AuthMethod)> {
    ladder
        .iter()
        .flat_map(|config| methods.iter().map(move |method| (config.clone(), *method)))
        .collect()
}

/// Static knobs shared by every attempt of one negotiation.
#[derive(Clone, Debug)]
pub struct NegotiationOptions {
    pub credentials: SmtpCredentials,
    pub methods: Vec<AuthMethod>,
    pub connection_timeout: Duration,
    pub socket_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub address_family: Option<AddressFamily>,
}

impl NegotiationOptions {
    fn params(&self, transport: TransportConfig, method: AuthMethod) -> ConnectionParams {
        ConnectionParams {
            transport,
            method,
            credentials: self.credentials.clone(),
            connection_timeout: self.connection_timeout,
            socket_timeout: self.socket_timeout,
            accept_invalid_certs: self.accept_invalid_certs,
            address_family: self.address_family,
        }
    }

    fn hint(&self) -> &'static str {
        if self.methods.len() == 1 && self.methods[0] == AuthMethod::Login {
            CHECK_SETTINGS_HINT
        } else {
            PIN_LOGIN_HINT
        }
    }
}

/// Runs the attempt plan sequentially, stopping at the first verified transport.
pub async fn negotiate<C>(
    connector: &C,
    primary: &TransportConfig,
    options: &NegotiationOptions,
) -> Result<Negotiated<C::Transport>, NegotiationExhausted>
where
    C: SmtpConnector + ?Sized,
{
    let plan = attempt_plan(&candidate_ladder(primary), &options.methods);
    let mut attempts = Vec::with_capacity(plan.len());

    for (config, method) in plan {
        tracing::debug!(
            host = %config.host,
            port = config.port,
            secure = config.secure,
            method = %method,
            "Verifying SMTP transport"
        );

        match connector.verify(options.params(config.clone(), method)).await {
            Ok(transport) => {
                shared::counter!(SMTP_VERIFY_ATTEMPTS, "result" => "success").increment(1);
                tracing::info!(
                    host = %config.host,
                    port = config.port,
                    secure = config.secure,
                    method = %method,
                    "SMTP transport verified"
                );
                attempts.push(DeliveryAttemptResult {
                    config,
                    method,
                    outcome: AttemptOutcome::Success,
                });
                return Ok(Negotiated {
                    transport,
                    attempts,
                });
            }
            Err(reason) => {
                shared::counter!(SMTP_VERIFY_ATTEMPTS, "result" => "failure").increment(1);
                tracing::warn!(
                    host = %config.host,
                    port = config.port,
                    secure = config.secure,
                    method = %method,
                    reason = %reason,
                    "SMTP verification failed"
                );
                attempts.push(DeliveryAttemptResult {
                    config,
                    method,
                    outcome: AttemptOutcome::Failure(reason),
                });
            }
        }
    }

    let last_reason = attempts
        .iter()
        .rev()
        .find_map(|attempt| match &attempt.outcome {
            AttemptOutcome::Failure(reason) => Some(reason.clone()),
            AttemptOutcome::Success => None,
        })
        .unwrap_or_else(|| "no SMTP authentication method configured".to_string());

    Err(NegotiationExhausted {
        last_reason,
        hint: options.hint(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{FakeConnector, negotiation_options};

    fn primary(port: u16, secure: bool) -> TransportConfig {
        TransportConfig {
            host: "mail.example.com".into(),
            port,
            secure,
        }
    }

    #[test]
    fn test_ladder_shape() {
        let ladder = candidate_ladder(&primary(2525, false));
        assert_eq!(
            ladder,
            vec![
                primary(2525, false),
                primary(SUBMISSION_PORT, false),
                primary(SMTPS_PORT, true),
            ]
        );
    }

    #[test]
    fn test_plan_order_is_config_major() {
        let ladder = candidate_ladder(&primary(465, true));
        let plan = attempt_plan(&ladder, &AuthMethod::PREFERENCE_ORDER);

        assert_eq!(plan.len(), 6);
        assert_eq!(plan[0], (primary(465, true), AuthMethod::Plain));
        assert_eq!(plan[1], (primary(465, true), AuthMethod::Login));
        assert_eq!(plan[2], (primary(587, false), AuthMethod::Plain));
        assert_eq!(plan[5], (primary(465, true), AuthMethod::Login));
    }

    #[test]
    fn test_parse_auth_method_and_family() {
        assert_eq!("plain".parse::<AuthMethod>(), Ok(AuthMethod::Plain));
        assert_eq!(" LOGIN ".parse::<AuthMethod>(), Ok(AuthMethod::Login));
        assert!("xoauth2".parse::<AuthMethod>().is_err());
        assert_eq!("6".parse::<AddressFamily>(), Ok(AddressFamily::V6));
        assert_eq!("ipv4".parse::<AddressFamily>(), Ok(AddressFamily::V4));
    }

    #[tokio::test]
    async fn test_exhaustion_makes_every_attempt_once() {
        let connector = FakeConnector::failing_all();
        let options = negotiation_options(&AuthMethod::PREFERENCE_ORDER);

        let err = negotiate(&connector, &primary(465, true), &options)
            .await
            .unwrap_err();

        assert_eq!(connector.verify_calls().len(), 3 * 2);
        assert_eq!(err.attempts.len(), 6);
        assert_eq!(err.hint, PIN_LOGIN_HINT);
        assert_eq!(
            err.last_reason,
            "refused mail.example.com:465 (tls) auth LOGIN"
        );
        assert!(err.to_string().contains(&err.last_reason));
    }

    #[tokio::test]
    async fn test_exhaustion_with_pinned_method() {
        let connector = FakeConnector::failing_all();
        let options = negotiation_options(&[AuthMethod::Login]);

        let err = negotiate(&connector, &primary(587, false), &options)
            .await
            .unwrap_err();

        assert_eq!(connector.verify_calls().len(), 3);
        assert!(
            connector
                .verify_calls()
                .iter()
                .all(|p| p.method == AuthMethod::Login)
        );
        assert_eq!(err.hint, CHECK_SETTINGS_HINT);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        // Second ladder entry accepts the first method tried.
        let connector =
            FakeConnector::succeeding_on(primary(SUBMISSION_PORT, false), AuthMethod::Plain);
        let options = negotiation_options(&AuthMethod::PREFERENCE_ORDER);

        let negotiated = negotiate(&connector, &primary(465, true), &options)
            .await
            .unwrap();

        let calls = connector.verify_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].transport, primary(SUBMISSION_PORT, false));
        assert_eq!(calls[2].method, AuthMethod::Plain);

        assert_eq!(negotiated.attempts.len(), 3);
        assert_eq!(negotiated.attempts[2].outcome, AttemptOutcome::Success);
        assert_eq!(negotiated.transport.config, primary(SUBMISSION_PORT, false));
    }

    #[tokio::test]
    async fn test_attempts_carry_per_request_parameters() {
        let connector = FakeConnector::succeeding_on(primary(465, true), AuthMethod::Plain);
        let mut options = negotiation_options(&AuthMethod::PREFERENCE_ORDER);
        options.accept_invalid_certs = true;
        options.connection_timeout = Duration::from_millis(250);

        negotiate(&connector, &primary(465, true), &options)
            .await
            .unwrap();

        let calls = connector.verify_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].accept_invalid_certs);
        assert_eq!(calls[0].connection_timeout, Duration::from_millis(250));
        assert_eq!(calls[0].credentials, options.credentials);
    }
}
