//! Delivery through the Resend HTTP API.
//!
//! One bearer-authenticated POST per submission, no retry. A non-success
//! response is surfaced with the provider's own status code and message.

use crate::errors::ContactError;
use crate::mail::OutgoingMail;
use serde::Serialize;
use serde_json::Value;
use url::Url;

const DEFAULT_ERROR_MESSAGE: &str = "Error sending email via Resend.";

#[derive(Serialize)]
#[serde(untagged)]
enum Recipients<'a> {
    One(&'a str),
    Many(&'a [String]),
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: String,
    to: Recipients<'a>,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
    reply_to: &'a str,
}

impl<'a> From<&'a OutgoingMail> for SendEmailRequest<'a> {
    fn from(mail: &'a OutgoingMail) -> Self {
        let to = match mail.to.as_slice() {
            [single] => Recipients::One(single),
            many => Recipients::Many(many),
        };
        SendEmailRequest {
            from: mail.from_header(),
            to,
            subject: &mail.subject,
            text: &mail.text,
            html: &mail.html,
            reply_to: &mail.reply_to,
        }
    }
}

#[derive(Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    api_url: Url,
}

impl HttpRelay {
    pub fn new(client: reqwest::Client, api_url: Url) -> Self {
        Self { client, api_url }
    }

    pub async fn send(&self, api_key: &str, mail: &OutgoingMail) -> Result<(), ContactError> {
        let response = self
            .client
            .post(self.api_url.clone())
            .bearer_auth(api_key)
            .json(&SendEmailRequest::from(mail))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %self.api_url, "Email provider unreachable");
                ContactError::UpstreamRequest(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = provider_error_message(&body);
        tracing::error!(status = status.as_u16(), body = %body, "Email provider rejected message");

        Err(ContactError::UpstreamProvider { status, message })
    }
}

/// Pulls the most specific message out of a provider error body.
///
/// Tries `error.message`, then `message`, then the raw text.
fn provider_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|json| {
        json.pointer("/error/message")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    from_json
        .filter(|m| !m.is_empty())
        .or_else(|| Some(body.trim().to_string()).filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string())
}
