// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, quiz},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the administration router.
///
/// * Merges the sub-routers (auth, quizzes, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, catalog).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new().route("/login", post(auth::login));

    let quiz_routes = Router::new().route("/", get(quiz::list_quizzes));

    let admin_routes = Router::new()
        .route("/quizzes", post(admin::create_quiz))
        .route("/quizzes/import", post(admin::import_quiz))
        .route(
            "/quizzes/{id}",
            put(admin::update_quiz).delete(admin::delete_quiz),
        )
        .route("/quizzes/{id}/questions", get(admin::list_questions))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::{Config, ScheduleConfig},
        db,
    };

    async fn app() -> Router {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::migrate(&pool).await.unwrap();
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "secret".to_string(),
            jwt_expiration: 60,
            rust_log: "error".to_string(),
            http_port: 0,
            admin_username: None,
            admin_password: None,
            chat_admins: vec![],
            default_quota: 1,
            schedule: ScheduleConfig::default(),
            matrix: None,
        };
        create_router(AppState::new(pool, config))
    }

    #[tokio::test]
    async fn quiz_listing_is_public() {
        let response = app()
            .await
            .oneshot(Request::get("/api/quizzes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn admin_routes_reject_missing_token() {
        let response = app()
            .await
            .oneshot(
                Request::delete("/api/admin/quizzes/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }
}
