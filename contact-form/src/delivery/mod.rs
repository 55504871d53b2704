//! Relays a validated submission to the site owner.
//!
//! A deployment uses exactly one strategy, picked by
//! [`ContactSettings::policy`]: the HTTP relay makes a single provider call,
//! the SMTP strategy negotiates a working transport first and then sends once.

pub mod http_relay;
pub mod negotiator;
pub mod smtp;

use crate::errors::ContactError;
use crate::mail::OutgoingMail;
use crate::settings::{ContactSettings, DeliveryPolicy, ResendTarget, SmtpSettings, SmtpTarget};
use crate::submission::ContactSubmission;
use http_relay::HttpRelay;
use negotiator::{
    DeliveryAttemptResult, MailTransport, NegotiationOptions, SmtpConnector, SmtpCredentials,
    TransportConfig, negotiate,
};
use smtp::PreparedMessage;
use std::sync::Arc;

/// What a successful delivery went through.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub policy: DeliveryPolicy,
    /// SMTP verification attempts, empty for the HTTP relay.
    pub attempts: Vec<DeliveryAttemptResult>,
}

pub struct Deliverer<C> {
    settings: Arc<ContactSettings>,
    http_relay: HttpRelay,
    connector: C,
}

impl<C> Deliverer<C>
where
    C: SmtpConnector,
{
    pub fn new(settings: Arc<ContactSettings>, client: reqwest::Client, connector: C) -> Self {
        let http_relay = HttpRelay::new(client, settings.resend.api_url.clone());
        Self {
            settings,
            http_relay,
            connector,
        }
    }

    pub fn settings(&self) -> &ContactSettings {
        &self.settings
    }

    pub async fn deliver(
        &self,
        submission: &ContactSubmission,
    ) -> Result<DeliveryReceipt, ContactError> {
        match self.settings.policy {
            DeliveryPolicy::HttpRelay => {
                let target = self.settings.resend_target().map_err(not_configured)?;
                self.deliver_http(target, submission).await
            }
            DeliveryPolicy::Smtp => {
                let target = self.settings.smtp_target().map_err(not_configured)?;
                self.deliver_smtp(target, submission).await
            }
        }
    }

    async fn deliver_http(
        &self,
        target: ResendTarget<'_>,
        submission: &ContactSubmission,
    ) -> Result<DeliveryReceipt, ContactError> {
        let mail = OutgoingMail::render(
            submission,
            &self.settings.from_name,
            target.from_address,
            target.recipients,
        );
        self.http_relay.send(target.api_key, &mail).await?;

        Ok(DeliveryReceipt {
            policy: DeliveryPolicy::HttpRelay,
            attempts: Vec::new(),
        })
    }

    async fn deliver_smtp(
        &self,
        target: SmtpTarget<'_>,
        submission: &ContactSubmission,
    ) -> Result<DeliveryReceipt, ContactError> {
        let mail = OutgoingMail::render(
            submission,
            &self.settings.from_name,
            target.from_address,
            target.recipients,
        );
        // Addresses lettre cannot parse must fail before any connection.
        let prepared = PreparedMessage::new(mail).map_err(|err| {
            tracing::warn!(error = %err, "Could not build SMTP message");
            ContactError::from(err)
        })?;

        let (primary, options) = negotiation_inputs(&target, &self.settings.smtp);
        let negotiated = negotiate(&self.connector, &primary, &options).await?;

        // Send failures are final, the ladder is not resumed.
        negotiated.transport.send(&prepared).await.map_err(|reason| {
            tracing::error!(reason = %reason, "SMTP send failed after verification");
            ContactError::Send(reason)
        })?;

        Ok(DeliveryReceipt {
            policy: DeliveryPolicy::Smtp,
            attempts: negotiated.attempts,
        })
    }

    /// Runs the negotiation only, without sending anything.
    pub async fn check_smtp(&self) -> Result<Vec<DeliveryAttemptResult>, ContactError> {
        let target = self.settings.smtp_target().map_err(not_configured)?;
        let (primary, options) = negotiation_inputs(&target, &self.settings.smtp);
        let negotiated = negotiate(&self.connector, &primary, &options).await?;
        Ok(negotiated.attempts)
    }
}

fn not_configured(missing: &'static str) -> ContactError {
    tracing::error!(missing, "Email delivery is not configured");
    ContactError::Configuration(missing.to_string())
}

fn negotiation_inputs(
    target: &SmtpTarget<'_>,
    smtp: &SmtpSettings,
) -> (TransportConfig, NegotiationOptions) {
    let primary = TransportConfig {
        host: target.host.to_string(),
        port: smtp.port,
        secure: smtp.secure,
    };
    let options = NegotiationOptions {
        credentials: SmtpCredentials {
            user: target.user.to_string(),
            pass: target.pass.to_string(),
        },
        methods: smtp.auth_methods(),
        connection_timeout: smtp.connection_timeout,
        socket_timeout: smtp.socket_timeout,
        accept_invalid_certs: !smtp.reject_unauthorized,
        address_family: smtp.address_family,
    };
    (primary, options)
}
