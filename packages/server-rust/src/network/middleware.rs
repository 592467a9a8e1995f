//! Transport-level HTTP middleware.
//!
//! The first layer listed is the outermost. The tenant binder is not part of
//! this stack: `NetworkModule` applies it last so it wraps everything here,
//! including the request timeout.

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// The composed layer type produced by [`build_http_layers`], outermost first.
pub type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            CorsLayer,
            Stack<
                CompressionLayer,
                Stack<TraceLayer<SharedClassifier<ServerErrorsAsFailures>>, Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>>,
            >,
        >,
    >,
>;

/// Builds the HTTP middleware stack.
///
/// Order, outermost to innermost:
/// 1. `SetRequestId`: assigns an `X-Request-Id`
/// 2. `Trace`: access span per request
/// 3. `Compression`: gzip responses
/// 4. `CORS`: configured origins, GET/POST
/// 5. `Timeout`: 408 after `request_timeout`
/// 6. `PropagateRequestId`: echoes `X-Request-Id` on the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// A `"*"` entry allows any origin; otherwise unparseable entries are skipped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
