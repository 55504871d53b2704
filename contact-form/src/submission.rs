//! Contact form fields: sanitization and validation.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

pub const FULL_NAME_LEN: (usize, usize) = (2, 100);
pub const MESSAGE_LEN: (usize, usize) = (10, 2000);
pub const PHONE_MAX_LEN: usize = 25;

static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n\t]+").unwrap());
static HTML_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F]").unwrap());
static REPEATED_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Services offered on the site. The form's `service` select posts these ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    DesarrolloWeb,
    Asesoria,
    Automatizacion,
    Seguridad,
    Domotica,
    Redes,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::DesarrolloWeb,
        ServiceKind::Asesoria,
        ServiceKind::Automatizacion,
        ServiceKind::Seguridad,
        ServiceKind::Domotica,
        ServiceKind::Redes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::DesarrolloWeb => "desarrollo-web",
            ServiceKind::Asesoria => "asesoria",
            ServiceKind::Automatizacion => "automatizacion",
            ServiceKind::Seguridad => "seguridad",
            ServiceKind::Domotica => "domotica",
            ServiceKind::Redes => "redes",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field values as extracted from a request body, before sanitization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFields {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub service: String,
    pub message: String,
}

/// Sanitized field values, not yet validated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SanitizedFields {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub service: String,
    pub message: String,
}

impl SanitizedFields {
    pub fn from_raw(raw: &RawFields) -> Self {
        SanitizedFields {
            full_name: sanitize_text(&raw.full_name),
            email: raw.email.trim().to_string(),
            phone: sanitize_phone(&raw.phone),
            service: raw.service.trim().to_string(),
            message: sanitize_text(&raw.message),
        }
    }

    /// True when none of the mandatory fields carries a value.
    pub fn required_all_empty(&self) -> bool {
        self.full_name.is_empty() && self.email.is_empty() && self.message.is_empty()
    }

    /// Applies the validation rules in order, failing on the first violation.
    pub fn validate(self) -> Result<ContactSubmission, ValidationError> {
        if self.full_name.is_empty() || self.email.is_empty() || self.message.is_empty() {
            return Err(ValidationError::MissingRequiredFields);
        }
        if !EMAIL.is_match(&self.email) {
            return Err(ValidationError::InvalidEmail);
        }
        if !within(&self.full_name, FULL_NAME_LEN) {
            return Err(ValidationError::FullNameLength);
        }
        if !within(&self.message, MESSAGE_LEN) {
            return Err(ValidationError::MessageLength);
        }
        let service = match self.service.as_str() {
            "" => None,
            id => Some(
                id.parse::<ServiceKind>()
                    .map_err(|_| ValidationError::UnknownService(id.to_string()))?,
            ),
        };
        if self.phone.chars().count() > PHONE_MAX_LEN {
            return Err(ValidationError::PhoneTooLong);
        }

        Ok(ContactSubmission {
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            service,
            message: self.message,
        })
    }
}

/// A validated contact request. Consumed once by delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactSubmission {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub service: Option<ServiceKind>,
    pub message: String,
}

impl ContactSubmission {
    /// Service id as submitted, or empty.
    pub fn service_id(&self) -> &'static str {
        self.service.as_ref().map(ServiceKind::as_str).unwrap_or("")
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Faltan datos requeridos.")]
    MissingRequiredFields,

    #[error("Email inválido.")]
    InvalidEmail,

    #[error("Nombre fuera de límites.")]
    FullNameLength,

    #[error("Mensaje fuera de límites.")]
    MessageLength,

    #[error("Servicio inválido.")]
    UnknownService(String),

    #[error("Teléfono inválido.")]
    PhoneTooLong,
}

fn within(value: &str, (min, max): (usize, usize)) -> bool {
    let len = value.chars().count();
    (min..=max).contains(&len)
}

/// Flattens free text to a single clean line.
///
/// Line breaks and tabs become spaces, tag-like `<...>` runs and control
/// characters are dropped, and whitespace is trimmed and collapsed.
pub fn sanitize_text(input: &str) -> String {
    let text = LINE_BREAKS.replace_all(input, " ");
    let text = HTML_TAGS.replace_all(&text, "");
    let text = CONTROL_CHARS.replace_all(&text, "");
    REPEATED_WHITESPACE
        .replace_all(text.trim(), " ")
        .into_owned()
}

/// Keeps ASCII digits and `+` only.
pub fn sanitize_phone(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}
