use crate::delivery::Deliverer;
use crate::delivery::negotiator::SmtpConnector;
use crate::errors::ContactError;
use crate::extract;
use crate::metrics_defs::{REQUEST_DURATION, SUBMISSIONS};
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use serde::Serialize;
use shared::http::make_json_response;
use std::time::Instant;

pub const CONTACT_PATH: &str = "/api/contact";
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Serialize, Debug, PartialEq)]
struct Accepted {
    ok: bool,
    #[serde(rename = "dryRun", skip_serializing_if = "std::ops::Not::not")]
    dry_run: bool,
}

/// Serves `POST /api/contact`: normalize the body, then deliver it (or
/// only log it in dry-run mode).
pub struct ContactHandler<C> {
    deliverer: Deliverer<C>,
}

impl<C> ContactHandler<C>
where
    C: SmtpConnector,
{
    pub fn new(deliverer: Deliverer<C>) -> Self {
        Self { deliverer }
    }

    pub async fn handle<B, E>(&self, request: Request<B>) -> Response<BoxBody<Bytes, E>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();

        let response = match self.process(request).await {
            Ok(accepted) => {
                let outcome = if accepted.dry_run { "dry_run" } else { "delivered" };
                shared::counter!(SUBMISSIONS, "outcome" => outcome).increment(1);
                make_json_response(StatusCode::OK, &accepted)
            }
            Err(err) => {
                if err.status_code().is_server_error() {
                    tracing::error!(error = %err, kind = err.kind(), "Contact submission failed");
                } else {
                    tracing::info!(error = %err, kind = err.kind(), "Contact submission rejected");
                }
                shared::counter!(SUBMISSIONS, "outcome" => err.kind()).increment(1);
                err.into_response()
            }
        };

        shared::histogram!(REQUEST_DURATION, "status" => response.status().as_u16().to_string())
            .record(start.elapsed().as_secs_f64());

        response
    }

    async fn process<B>(&self, request: Request<B>) -> Result<Accepted, ContactError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if request.uri().path() != CONTACT_PATH {
            return Err(ContactError::NotFound);
        }
        if request.method() != Method::POST {
            return Err(ContactError::MethodNotAllowed);
        }

        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = Limited::new(request.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| ContactError::RequestBody(e.to_string()))?
            .to_bytes();

        let submission = extract::normalize(&body, content_type.as_deref()).await?;

        if self.deliverer.settings().dry_run {
            tracing::info!(
                service = submission.service_id(),
                message_len = submission.message.chars().count(),
                "Dry run, skipping delivery"
            );
            return Ok(Accepted {
                ok: true,
                dry_run: true,
            });
        }

        let receipt = self.deliverer.deliver(&submission).await?;
        tracing::info!(
            policy = receipt.policy.as_str(),
            attempts = receipt.attempts.len(),
            "Contact submission delivered"
        );

        Ok(Accepted {
            ok: true,
            dry_run: false,
        })
    }
}
