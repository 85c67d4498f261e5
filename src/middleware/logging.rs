//! HTTP and outbound-call logging
//!
//! Every inbound request gets a span carrying its `x-request-id` and route
//! group. Partner bank calls and Postgres statements are timed through
//! [`log_external_call`] and [`log_database_query`].

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// A resolution may walk the whole search window at the partner
const SLOW_RESOLUTION: Duration = Duration::from_secs(5);
const SLOW_ROUTE: Duration = Duration::from_millis(500);
const SLOW_QUERY: Duration = Duration::from_millis(100);

/// Request ids are random UUIDv4 strings
#[derive(Clone, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Coarse grouping of routes for log filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGroup {
    Recharge,
    BankLookup,
    Admin,
    Health,
    Other,
}

impl RouteGroup {
    pub fn classify(path: &str) -> Self {
        if path == "/health" {
            RouteGroup::Health
        } else if path.starts_with("/admin/") {
            RouteGroup::Admin
        } else if path.starts_with("/bancamiga-") {
            RouteGroup::BankLookup
        } else if path == "/wallet-recharge" || path.starts_with("/recharge-requests") {
            RouteGroup::Recharge
        } else {
            RouteGroup::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteGroup::Recharge => "recharge",
            RouteGroup::BankLookup => "bank_lookup",
            RouteGroup::Admin => "admin",
            RouteGroup::Health => "health",
            RouteGroup::Other => "other",
        }
    }

    /// Routes that may call the partner bank several times
    fn slow_threshold(&self) -> Duration {
        match self {
            RouteGroup::Recharge | RouteGroup::BankLookup => SLOW_RESOLUTION,
            _ => SLOW_ROUTE,
        }
    }
}

/// Log one line when a request starts and one when it completes
///
/// Health checks are logged at debug only.
pub async fn request_logging_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let start = Instant::now();

    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let group = RouteGroup::classify(&route);

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        route = %route,
        group = group.as_str(),
    );

    let response = async {
        if group == RouteGroup::Health {
            debug!("Request started");
        } else {
            info!("Request started");
        }
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let elapsed = start.elapsed();
    span.in_scope(|| log_outcome(group, response.status(), elapsed));

    Ok(response)
}

fn log_outcome(group: RouteGroup, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16();
    let duration_ms = elapsed.as_millis() as u64;

    if status.is_server_error() {
        error!(status = status_code, duration_ms, "Request failed with server error");
    } else if elapsed > group.slow_threshold() {
        warn!(status = status_code, duration_ms, "Slow request completed");
    } else if status.is_client_error() {
        // 404 and 409 are ordinary outcomes of a recharge claim
        info!(status = status_code, duration_ms, "Request rejected");
    } else if group == RouteGroup::Health {
        debug!(status = status_code, duration_ms, "Request completed");
    } else {
        info!(status = status_code, duration_ms, "Request completed");
    }
}

/// Time a Postgres statement; failures and slow statements are logged
pub async fn log_database_query<F, T, E>(query: &str, operation: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = operation.await;
    let elapsed = start.elapsed();
    let duration_ms = elapsed.as_millis() as u64;

    match &result {
        Err(e) => error!(
            event_type = "database_query_error",
            query,
            duration_ms,
            error = %e,
            "Database query failed"
        ),
        Ok(_) if elapsed > SLOW_QUERY => warn!(
            event_type = "slow_database_query",
            query,
            duration_ms,
            "Slow database query"
        ),
        Ok(_) => debug!(event_type = "database_query_complete", query, duration_ms),
    }

    result
}

/// Time a partner bank call and record its outcome
///
/// `endpoint` is the partner path; bodies are never logged here.
pub async fn log_external_call<F, T, E>(service: &str, endpoint: &str, operation: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    debug!(event_type = "external_call_start", service, endpoint);

    let start = Instant::now();
    let result = operation.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(
            event_type = "external_call_complete",
            service,
            endpoint,
            duration_ms,
            "Partner call completed"
        ),
        Err(e) => warn!(
            event_type = "external_call_error",
            service,
            endpoint,
            duration_ms,
            error = %e,
            "Partner call failed"
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn routes_are_grouped() {
        assert_eq!(RouteGroup::classify("/wallet-recharge"), RouteGroup::Recharge);
        assert_eq!(
            RouteGroup::classify("/recharge-requests/{id}/resolve"),
            RouteGroup::Recharge
        );
        assert_eq!(
            RouteGroup::classify("/bancamiga-find-payment"),
            RouteGroup::BankLookup
        );
        assert_eq!(
            RouteGroup::classify("/admin/reconciliation/manual"),
            RouteGroup::Admin
        );
        assert_eq!(RouteGroup::classify("/health"), RouteGroup::Health);
        assert_eq!(RouteGroup::classify("/metrics"), RouteGroup::Other);
    }

    #[test]
    fn partner_routes_tolerate_longer_latency() {
        assert!(RouteGroup::Recharge.slow_threshold() > RouteGroup::Admin.slow_threshold());
    }

    #[tokio::test]
    async fn middleware_passes_the_response_through() {
        async fn handler() -> &'static str {
            "ok"
        }

        let app: Router = Router::new()
            .route("/wallet-recharge", get(handler))
            .layer(axum::middleware::from_fn(request_logging_middleware));

        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/wallet-recharge")
                    .header("x-request-id", "req-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn query_timer_returns_the_result() {
        let result = log_database_query("select_wallet", async { Ok::<_, String>(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn external_call_timer_propagates_errors() {
        let result = log_external_call("bancamiga", "/movements/mobile/find", async {
            Err::<(), _>("timeout".to_string())
        })
        .await;
        assert_eq!(result, Err("timeout".to_string()));
    }
}
