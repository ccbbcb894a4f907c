pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::analysis::extract::MAX_UPLOAD_BYTES;
use crate::analysis::handlers as analysis;
use crate::auth::handlers as auth;
use crate::state::AppState;
use crate::{contact, settings, users};

/// Room for the multipart framing and text fields around the file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Auth
        .route("/api/auth/register", post(auth::handle_register))
        .route("/api/auth/login", post(auth::handle_login))
        .route("/api/auth/refresh", post(auth::handle_refresh))
        .route("/api/auth/logout", post(auth::handle_logout))
        .route("/api/auth/verify-email", post(auth::handle_verify_email))
        .route(
            "/api/auth/resend-verification",
            post(auth::handle_resend_verification),
        )
        .route("/api/auth/forgotPassword", post(auth::handle_forgot_password))
        .route(
            "/api/auth/resetPassword/:token",
            put(auth::handle_reset_password),
        )
        // Analysis
        .route(
            "/api/analysis",
            post(analysis::handle_create_analysis)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/api/analysis/history", get(analysis::handle_history))
        .route("/api/analysis/:id", get(analysis::handle_get_analysis))
        .route(
            "/api/analysis/:id/generate-summary",
            post(analysis::handle_generate_summary),
        )
        .route(
            "/api/analysis/:id/generate-cover-letter",
            post(analysis::handle_generate_cover_letter),
        )
        .route(
            "/api/analysis/:id/cover-letter",
            put(analysis::handle_update_cover_letter),
        )
        .route(
            "/api/analysis/:id/generate-interview",
            post(analysis::handle_generate_interview),
        )
        // Settings
        .route("/api/settings/me", get(settings::handle_get_settings))
        .route("/api/settings/profile", put(settings::handle_update_profile))
        .route("/api/settings/password", put(settings::handle_change_password))
        .route(
            "/api/settings/notifications",
            put(settings::handle_update_notifications),
        )
        // Users
        .route(
            "/api/users",
            get(users::handle_list_users).post(users::handle_create_user),
        )
        .route(
            "/api/users/:id",
            get(users::handle_get_user).put(users::handle_update_user),
        )
        // Contact
        .route("/api/contact", post(contact::handle_contact))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::FromRef,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::jwt::JwtKeys;
    use crate::models::user::Role;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn bearer(state: &AppState) -> String {
        let token = JwtKeys::from_ref(state)
            .sign_access(Uuid::new_v4(), Role::Free)
            .unwrap();
        format!("Bearer {token}")
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], health::SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_analysis_routes_require_a_bearer_token() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::get("/api/analysis/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Not authorized, no token");
    }

    #[tokio::test]
    async fn test_forged_token_is_rejected() {
        let app = build_router(AppState::for_tests());
        let forged = JwtKeys::new("another-secret", 900)
            .sign_access(Uuid::new_v4(), Role::Paid)
            .unwrap();
        let response = app
            .oneshot(
                Request::get("/api/settings/me")
                    .header(header::AUTHORIZATION, format!("Bearer {forged}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Not authorized, token failed");
    }

    #[tokio::test]
    async fn test_refresh_without_cookie_clears_cookie() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::post("/api/auth/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("refresh_token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_replayed_refresh_cookie_is_rejected() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::post("/api/auth/refresh")
                    .header(header::COOKIE, "refresh_token=never-issued")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Invalid refresh token");
    }

    #[tokio::test]
    async fn test_logout_always_succeeds() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::post("/api/auth/logout")
                    .header(header::COOKIE, "refresh_token=unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::SET_COOKIE));
        assert_eq!(body_json(response).await["data"]["message"], "Logged out successfully");
    }

    #[tokio::test]
    async fn test_register_password_mismatch() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                json!({
                    "name": "Ana",
                    "email": "ana@x.com",
                    "password": "Secret123",
                    "password_confirm": "Secret124"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Passwords do not match");
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let state = AppState::for_tests();
        let auth = bearer(&state);
        let app = build_router(state);

        let boundary = "cvboundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"jobDescription\"\r\n\r\n\
             Backend engineer, Rust\r\n\
             --{boundary}--\r\n"
        );
        let response = app
            .oneshot(
                Request::post("/api/analysis")
                    .header(header::AUTHORIZATION, auth)
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_notifications_without_boolean_flags_is_rejected() {
        let state = AppState::for_tests();
        let mut request = json_request(
            "PUT",
            "/api/settings/notifications",
            json!({"theme": "dark", "promotions": "yes"}),
        );
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, bearer(&state).parse().unwrap());

        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "No valid notification settings provided"
        );
    }

    #[tokio::test]
    async fn test_other_users_record_is_not_found() {
        let state = AppState::for_tests();
        let mut request = Request::get(format!("/api/users/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, bearer(&state).parse().unwrap());

        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_contact_validation() {
        let app = build_router(AppState::for_tests());
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/contact",
                json!({"name": "Ana", "email": "ana@x.com", "subject": "Hi", "message": "short"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
