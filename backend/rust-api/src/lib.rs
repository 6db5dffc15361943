#![allow(dead_code)]

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // CORS for the React frontend
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Tutor surface: scheduling, lifecycle decisions, inquiries
        .nest(
            "/api/tutor",
            tutor_routes(app_state.clone())
                .layer(middleware::from_fn(middlewares::csrf::csrf_middleware))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        // Student surface: session responses, reschedules, ratings, inquiries
        .nest(
            "/api/student",
            student_routes()
                .layer(middleware::from_fn(middlewares::csrf::csrf_middleware))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        // Hire-request state machine + payment-status read
        .nest(
            "/api/auth",
            hire_routes()
                .layer(middleware::from_fn(middlewares::csrf::csrf_middleware))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        // Payment checkout + gateway webhook
        .nest("/api/payment", payment_routes(app_state.clone()))
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware)) // Apply CSP to all responses
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn tutor_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    // Session creation carries its own tighter limiter on top of the
    // general one
    let create_route = Router::new()
        .route("/sessions", post(handlers::tutor::create_session))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::rate_limit::booking_rate_limit_middleware,
        ));

    Router::new()
        .route("/sessions", get(handlers::tutor::list_sessions))
        .route(
            "/sessions/update/{session_id}",
            put(handlers::tutor::update_session),
        )
        .route(
            "/sessions/delete/{session_id}",
            delete(handlers::tutor::delete_session),
        )
        .route(
            "/sessions/{session_id}/reschedule/decide",
            put(handlers::tutor::decide_reschedule),
        )
        .route("/inquiries", get(handlers::tutor::list_inquiries))
        .route(
            "/inquiries/{inquiry_id}/read",
            put(handlers::tutor::mark_inquiry_read),
        )
        .route(
            "/inquiries/{inquiry_id}/reply",
            put(handlers::tutor::reply_inquiry),
        )
        .route(
            "/inquiries/{inquiry_id}/convert",
            post(handlers::tutor::convert_inquiry),
        )
        .merge(create_route)
}

fn student_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/sessions", get(handlers::student::list_sessions))
        .route(
            "/sessions/{session_id}/respond",
            post(handlers::student::respond_session),
        )
        .route(
            "/sessions/{session_id}/reschedule",
            post(handlers::student::propose_reschedule),
        )
        .route(
            "/sessions/{session_id}/rate",
            post(handlers::student::rate_session),
        )
        .route("/inquiries", post(handlers::student::create_inquiry))
}

fn hire_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/tutors/sessions", post(handlers::hire::request_hire))
        .route(
            "/tutors/hire-requests/respond",
            put(handlers::hire::respond_hire),
        )
        .route(
            "/student/payment-status/{user_id}",
            get(handlers::payment::payment_status),
        )
}

fn payment_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    // Checkout creation is JWT + CSRF protected and rate limited; the
    // webhook is public and authenticated by its HMAC signature instead.
    let checkout_route = Router::new()
        .route(
            "/create-checkout-session",
            post(handlers::payment::create_checkout_session),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::payment_rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn(middlewares::csrf::csrf_middleware))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    let webhook_route = Router::new().route("/webhook", post(handlers::payment::webhook));

    checkout_route.merge(webhook_route)
}
