pub mod config;
pub mod delivery;
pub mod errors;
pub mod extract;
pub mod handler;
pub mod mail;
pub mod metrics_defs;
pub mod settings;
pub mod submission;

#[cfg(test)]
mod testutils;

use delivery::Deliverer;
use delivery::negotiator::DeliveryAttemptResult;
use delivery::smtp::LettreConnector;
use errors::ContactError;
use handler::ContactHandler;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use settings::ContactSettings;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run(config: config::Config, settings: ContactSettings) -> Result<(), ContactError> {
    shared::metrics_defs::describe_all(metrics_defs::ALL_METRICS);

    if settings.dry_run {
        tracing::warn!("EMAIL_DRY_RUN is set, submissions are logged and not delivered");
    } else if let Some(missing) = settings.missing_for_delivery() {
        tracing::warn!(
            policy = settings.policy.as_str(),
            missing,
            "Email delivery is not configured, submissions will be rejected"
        );
    }

    let settings = Arc::new(settings);
    let deliverer = Deliverer::new(settings.clone(), http_client()?, LettreConnector);
    let contact_service = ContactService {
        handler: Arc::new(ContactHandler::new(deliverer)),
    };

    let ready_settings = settings.clone();
    let admin_service = AdminService::<_, ContactError>::new(move || ready_settings.is_ready());

    let contact_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        contact_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );
    tokio::try_join!(contact_task, admin_task)?;

    Ok(())
}

/// Negotiates an SMTP transport with the configured settings without
/// sending anything.
pub async fn smtp_check(
    settings: ContactSettings,
) -> Result<Vec<DeliveryAttemptResult>, ContactError> {
    let deliverer = Deliverer::new(Arc::new(settings), http_client()?, LettreConnector);
    deliverer.check_smtp().await
}

fn http_client() -> Result<reqwest::Client, ContactError> {
    reqwest::Client::builder()
        .timeout(PROVIDER_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ContactError::Internal(format!("could not build HTTP client: {e}")))
}

struct ContactService {
    handler: Arc<ContactHandler<LettreConnector>>,
}

impl Service<Request<Incoming>> for ContactService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = ContactError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}
