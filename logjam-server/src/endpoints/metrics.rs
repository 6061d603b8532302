//! The scrape endpoint.

use std::error::Error;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use logjam_metrics::CollectorManager;
use logjam_statsd::metric;

use crate::exposition;
use crate::service::ServiceState;
use crate::statsd::{ServerDistributions, ServerTimers};

/// Gathers and encodes all collectors.
fn render(manager: &CollectorManager) -> Result<String, prometheus::Error> {
    let body = metric!(timer(ServerTimers::ScrapeDuration), {
        exposition::encode(&manager.gather())?
    });

    metric!(distribution(ServerDistributions::ScrapeSize) = body.len() as u64);
    Ok(body)
}

pub async fn handle(State(state): State<ServiceState>) -> Response {
    match render(state.manager()) {
        Ok(body) => ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response(),
        Err(error) => {
            logjam_log::error!(error = &error as &dyn Error, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
