//! Request body decoding.
//!
//! The site's script posts JSON, while the no-script fallback posts the form
//! itself. Each encoding is an independent strategy returning the raw fields
//! it found (or nothing). Strategies run in [`EXTRACTION_ORDER`] and the first
//! one that yields any mandatory field wins.

use crate::submission::{ContactSubmission, RawFields, SanitizedFields, ValidationError};
use futures_util::stream;
use hyper::body::Bytes;
use serde_json::{Map, Value};
use std::convert::Infallible;

/// Wire names of the contact fields.
const FULL_NAME: &str = "fullName";
const EMAIL: &str = "email";
const PHONE: &str = "phone";
const SERVICE: &str = "service";
const MESSAGE: &str = "message";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Form,
}

pub const EXTRACTION_ORDER: [BodyEncoding; 2] = [BodyEncoding::Json, BodyEncoding::Form];

impl BodyEncoding {
    /// Decodes `body` with this strategy. `None` means the body is not in
    /// this encoding.
    pub async fn extract(&self, body: &Bytes, content_type: Option<&str>) -> Option<RawFields> {
        match self {
            BodyEncoding::Json => extract_json(body),
            BodyEncoding::Form => extract_form(body, content_type).await,
        }
    }
}

/// Extracts, sanitizes and validates a contact submission from a raw body.
pub async fn normalize(
    body: &Bytes,
    content_type: Option<&str>,
) -> Result<ContactSubmission, ValidationError> {
    let mut fields = SanitizedFields::default();

    for encoding in EXTRACTION_ORDER {
        let Some(raw) = encoding.extract(body, content_type).await else {
            continue;
        };
        fields = SanitizedFields::from_raw(&raw);
        if !fields.required_all_empty() {
            break;
        }
    }

    fields.validate()
}

fn extract_json(body: &Bytes) -> Option<RawFields> {
    let object: Map<String, Value> = serde_json::from_slice(body).ok()?;
    let field = |name: &str| object.get(name).map(json_text).unwrap_or_default();

    Some(RawFields {
        full_name: field(FULL_NAME),
        email: field(EMAIL),
        phone: field(PHONE),
        service: field(SERVICE),
        message: field(MESSAGE),
    })
}

/// Scalars are taken as text; falsy values and containers read as empty.
fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.as_f64() != Some(0.0) => n.to_string(),
        Value::Bool(true) => "true".to_string(),
        _ => String::new(),
    }
}

async fn extract_form(body: &Bytes, content_type: Option<&str>) -> Option<RawFields> {
    match content_type.and_then(|ct| multer::parse_boundary(ct).ok()) {
        Some(boundary) => extract_multipart(body.clone(), boundary).await,
        None => extract_urlencoded(body),
    }
}

fn extract_urlencoded(body: &Bytes) -> Option<RawFields> {
    // Anything that is not text cannot be a form submission.
    std::str::from_utf8(body).ok()?;

    let mut raw = RawFields::default();
    for (key, value) in url::form_urlencoded::parse(body) {
        // First occurrence wins.
        if let Some(slot) = slot_for(&mut raw, &key)
            && slot.is_empty()
        {
            *slot = value.into_owned();
        }
    }
    Some(raw)
}

async fn extract_multipart(body: Bytes, boundary: String) -> Option<RawFields> {
    let stream = stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut raw = RawFields::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed multipart body");
                return None;
            }
        };

        // File uploads are not part of the form.
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let text = match field.text().await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, field = %name, "Unreadable multipart field");
                return None;
            }
        };
        if let Some(slot) = slot_for(&mut raw, &name)
            && slot.is_empty()
        {
            *slot = text;
        }
    }

    Some(raw)
}

fn slot_for<'a>(raw: &'a mut RawFields, name: &str) -> Option<&'a mut String> {
    match name {
        FULL_NAME => Some(&mut raw.full_name),
        EMAIL => Some(&mut raw.email),
        PHONE => Some(&mut raw.phone),
        SERVICE => Some(&mut raw.service),
        MESSAGE => Some(&mut raw.message),
        _ => None,
    }
}
