//! Delivery settings sourced from the process environment.
//!
//! Settings are read once at startup into an immutable [`ContactSettings`]
//! value which is then shared by every request. Missing credentials are not
//! a startup error: they surface per request as configuration errors so the
//! site keeps answering validation failures even when mail is misconfigured.

use crate::delivery::negotiator::{AddressFamily, AuthMethod, SMTPS_PORT};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com/emails";
pub const DEFAULT_RESEND_FROM: &str = "onboarding@resend.dev";
pub const DEFAULT_FROM_NAME: &str = "Salarcon Tech Contact";
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Which delivery strategy a deployment uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Single authenticated call to the transactional-email HTTP API.
    HttpRelay,
    /// SMTP with host/port/security/auth negotiation.
    Smtp,
}

impl DeliveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPolicy::HttpRelay => "resend",
            DeliveryPolicy::Smtp => "smtp",
        }
    }
}

impl FromStr for DeliveryPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resend" | "http" => Ok(DeliveryPolicy::HttpRelay),
            "smtp" => Ok(DeliveryPolicy::Smtp),
            _ => Err(()),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct ResendSettings {
    pub api_key: Option<String>,
    pub from_address: String,
    pub api_url: Url,
}

impl fmt::Debug for ResendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResendSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("api_url", &self.api_url.as_str())
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    /// Whether the connection is wrapped in TLS from the first byte.
    pub secure: bool,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub from_address: Option<String>,
    /// Replaces the shared recipient list for SMTP delivery when non-empty.
    pub recipients_override: Vec<String>,
    pub pinned_auth_method: Option<AuthMethod>,
    pub reject_unauthorized: bool,
    pub address_family: Option<AddressFamily>,
    pub connection_timeout: Duration,
    pub socket_timeout: Duration,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("recipients_override", &self.recipients_override)
            .field("pinned_auth_method", &self.pinned_auth_method)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("address_family", &self.address_family)
            .field("connection_timeout", &self.connection_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

impl SmtpSettings {
    /// Auth methods to try, in order.
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        match self.pinned_auth_method {
            Some(method) => vec![method],
            None => AuthMethod::PREFERENCE_ORDER.to_vec(),
        }
    }
}

/// Resolved HTTP relay inputs.
#[derive(Clone, Copy, PartialEq)]
pub struct ResendTarget<'a> {
    pub api_key: &'a str,
    pub from_address: &'a str,
    pub recipients: &'a [String],
}

/// Resolved SMTP inputs. The sender falls back to the login user.
#[derive(Clone, Copy, PartialEq)]
pub struct SmtpTarget<'a> {
    pub host: &'a str,
    pub user: &'a str,
    pub pass: &'a str,
    pub from_address: &'a str,
    pub recipients: &'a [String],
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContactSettings {
    pub dry_run: bool,
    pub policy: DeliveryPolicy,
    pub recipients: Vec<String>,
    pub from_name: String,
    pub resend: ResendSettings,
    pub smtp: SmtpSettings,
}

impl ContactSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, treating blank values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let dry_run = get("EMAIL_DRY_RUN").is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let smtp_host = get("SMTP_HOST");
        let policy = match get("CONTACT_TRANSPORT") {
            Some(value) => parse_value("CONTACT_TRANSPORT", value)?,
            None if smtp_host.is_some() => DeliveryPolicy::Smtp,
            None => DeliveryPolicy::HttpRelay,
        };

        let api_url = match get("RESEND_API_URL") {
            Some(value) => Url::parse(&value).map_err(|_| SettingsError::InvalidValue {
                key: "RESEND_API_URL",
                value,
            })?,
            None => Url::parse(DEFAULT_RESEND_API_URL).map_err(|_| {
                SettingsError::InvalidValue {
                    key: "RESEND_API_URL",
                    value: DEFAULT_RESEND_API_URL.to_string(),
                }
            })?,
        };

        let port = match get("SMTP_PORT") {
            Some(value) => parse_value::<u16>("SMTP_PORT", value)?,
            None => SMTPS_PORT,
        };
        let secure = match get("SMTP_SECURE") {
            Some(value) => parse_bool("SMTP_SECURE", value)?,
            None => port == SMTPS_PORT,
        };
        let reject_unauthorized = match get("SMTP_TLS_REJECT_UNAUTHORIZED") {
            Some(value) => parse_bool("SMTP_TLS_REJECT_UNAUTHORIZED", value)?,
            None => true,
        };

        let user = get("SMTP_USER");
        let smtp = SmtpSettings {
            host: smtp_host,
            port,
            secure,
            from_address: get("SMTP_FROM").or_else(|| user.clone()),
            user,
            pass: get("SMTP_PASS"),
            recipients_override: get("SMTP_TO").map(|v| split_list(&v)).unwrap_or_default(),
            pinned_auth_method: get("SMTP_AUTH_METHOD")
                .map(|v| parse_value("SMTP_AUTH_METHOD", v))
                .transpose()?,
            reject_unauthorized,
            address_family: get("SMTP_FAMILY")
                .map(|v| parse_value("SMTP_FAMILY", v))
                .transpose()?,
            connection_timeout: get("SMTP_CONNECTION_TIMEOUT_MS")
                .map(|v| parse_millis("SMTP_CONNECTION_TIMEOUT_MS", v))
                .transpose()?
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            socket_timeout: get("SMTP_SOCKET_TIMEOUT_MS")
                .map(|v| parse_millis("SMTP_SOCKET_TIMEOUT_MS", v))
                .transpose()?
                .unwrap_or(DEFAULT_SOCKET_TIMEOUT),
        };

        Ok(ContactSettings {
            dry_run,
            policy,
            recipients: get("CONTACT_TO").map(|v| split_list(&v)).unwrap_or_default(),
            from_name: get("SMTP_FROM_NAME").unwrap_or_else(|| DEFAULT_FROM_NAME.to_string()),
            resend: ResendSettings {
                api_key: get("RESEND_API_KEY"),
                from_address: get("RESEND_FROM").unwrap_or_else(|| DEFAULT_RESEND_FROM.to_string()),
                api_url,
            },
            smtp,
        })
    }

    /// Recipients used by SMTP delivery.
    pub fn smtp_recipients(&self) -> &[String] {
        if self.smtp.recipients_override.is_empty() {
            &self.recipients
        } else {
            &self.smtp.recipients_override
        }
    }

    /// Everything the HTTP relay needs, or what is missing.
    pub fn resend_target(&self) -> Result<ResendTarget<'_>, &'static str> {
        let api_key = self
            .resend
            .api_key
            .as_deref()
            .ok_or("RESEND_API_KEY is not set")?;
        if self.recipients.is_empty() {
            return Err("CONTACT_TO is not set");
        }
        Ok(ResendTarget {
            api_key,
            from_address: &self.resend.from_address,
            recipients: &self.recipients,
        })
    }

    /// Everything SMTP delivery needs, or what is missing.
    pub fn smtp_target(&self) -> Result<SmtpTarget<'_>, &'static str> {
        let host = self.smtp.host.as_deref().ok_or("SMTP_HOST is not set")?;
        let (Some(user), Some(pass)) = (self.smtp.user.as_deref(), self.smtp.pass.as_deref())
        else {
            return Err("SMTP_USER and SMTP_PASS must be set");
        };
        let recipients = self.smtp_recipients();
        if recipients.is_empty() {
            return Err("SMTP_TO or CONTACT_TO must be set");
        }
        Ok(SmtpTarget {
            host,
            user,
            pass,
            from_address: self.smtp.from_address.as_deref().unwrap_or(user),
            recipients,
        })
    }

    /// Describes what the selected strategy is missing, if anything.
    pub fn missing_for_delivery(&self) -> Option<&'static str> {
        match self.policy {
            DeliveryPolicy::HttpRelay => self.resend_target().err(),
            DeliveryPolicy::Smtp => self.smtp_target().err(),
        }
    }

    /// Whether a submission could be accepted end to end right now.
    pub fn is_ready(&self) -> bool {
        self.dry_run || self.missing_for_delivery().is_none()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, SettingsError> {
    value
        .parse()
        .map_err(|_| SettingsError::InvalidValue { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SettingsError::InvalidValue { key, value }),
    }
}

fn parse_millis(key: &'static str, value: String) -> Result<Duration, SettingsError> {
    parse_value::<u64>(key, value).map(Duration::from_millis)
}
