use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header::CONTENT_TYPE, Method},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use futures::Stream;
use presence_core::{NewPerson, Role};
use presence_store::ImageUpload;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::AppError;
use crate::live;
use crate::scan::ScanReply;
use crate::session::{expired_session_cookie, session_cookie, CurrentSession, Session};
use crate::state::SharedState;
use crate::video;

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(status_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/scan", post(scan_handler))
        .route("/recognition_feed", get(recognition_feed_handler))
        .route("/video_feed", get(video_feed_handler))
        .route("/attendance", get(attendance_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store.describe(),
        "embedder": {
            "url": state.config.embedder_url,
            "model": state.config.embedder_model,
        },
        "distance_threshold": state.scanner.threshold(),
        "camera": state.camera.device(),
        "sessions": state.sessions.len().await,
    }))
}

/// Uploaded file from a multipart field.
struct UploadedFile {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Collect named text fields and at most one file field.
async fn read_multipart(
    mut multipart: Multipart,
    file_field: &str,
) -> Result<(Vec<(String, String)>, Option<UploadedFile>), AppError> {
    let mut fields = Vec::new();
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("malformed upload: {e}")))?;
            file = Some(UploadedFile {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(format!("malformed field {name}: {e}")))?;
            fields.push((name, value));
        }
    }

    Ok((fields, file))
}

fn text_field<'a>(fields: &'a [(String, String)], name: &str) -> Result<&'a str, AppError> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("missing field: {name}")))
}

async fn register_handler(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let (fields, file) = read_multipart(multipart, "image").await?;
    let name = text_field(&fields, "name")?.to_string();
    let role = text_field(&fields, "role")?
        .parse::<Role>()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let file = file
        .filter(|f| !f.bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing field: image".into()))?;

    let embedding = state
        .extractor
        .from_bytes(&file.bytes)
        .await
        .into_embedding()
        .ok_or(AppError::NoFace)?;

    let person = NewPerson {
        name: name.clone(),
        role,
        embedding,
    };
    let image = ImageUpload {
        file_name: file.file_name.unwrap_or_else(|| "face.jpg".to_string()),
        content_type: file.content_type.unwrap_or_else(|| "image/jpeg".to_string()),
        bytes: file.bytes,
    };
    let created = state.store.create_person(&person, Some(image)).await?;

    Ok(Json(serde_json::json!({
        "message": format!("Registration successful for {name}!"),
        "id": created.id,
    })))
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(alias = "user_id")]
    name: String,
}

async fn login_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let name = form.name.trim();
    let roster = state.store.list_people().await?;
    let person = roster
        .into_iter()
        .find(|p| p.name == name)
        .ok_or(AppError::UnknownUser)?;

    let token = state
        .sessions
        .create(Session {
            name: person.name.clone(),
            role: person.role,
        })
        .await;
    tracing::info!(user = %person.name, role = %person.role, "logged in");

    Ok((
        jar.add(session_cookie(token)),
        Json(serde_json::json!({ "user": person.name, "role": person.role })),
    ))
}

async fn logout_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    current: CurrentSession,
) -> impl IntoResponse {
    state.sessions.remove(&current.token).await;
    tracing::info!(user = %current.session.name, "logged out");
    (
        jar.remove(expired_session_cookie()),
        Json(serde_json::json!({ "message": "Logged out" })),
    )
}

async fn scan_handler(
    State(state): State<SharedState>,
    _current: CurrentSession,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let (_, file) = read_multipart(multipart, "uploaded_image").await?;
    let file = file
        .filter(|f| !f.bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing field: uploaded_image".into()))?;

    let outcome = state
        .scanner
        .scan(state.extractor.from_bytes(&file.bytes).await)
        .await;
    Ok(ScanReply(outcome).into_response())
}

async fn recognition_feed_handler(
    State(state): State<SharedState>,
    _current: CurrentSession,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(live::spawn(state))
        .map(|event| Ok(Event::default().data(event.message)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn video_feed_handler(State(state): State<SharedState>) -> Response {
    video::mjpeg_response(live::spawn_capture(state.camera.clone()))
}

async fn attendance_handler(
    State(state): State<SharedState>,
    current: CurrentSession,
) -> Result<impl IntoResponse, AppError> {
    current.require_teacher()?;
    let records = state.store.list_presences().await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_state, FakeCamera, StubEmbedder};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use presence_core::Embedding;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XTESTBOUNDARY";

    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// Build a multipart body from (field, file name, content).
    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(uri: &str, cookie: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut req = Request::post(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        req.body(Body::from(body)).unwrap()
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::get(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        req.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Log in and return the `name=value` cookie pair.
    async fn login(state: &SharedState, name: &str) -> String {
        let response = router(state.clone())
            .oneshot(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(format!("user_id={name}")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn matching_state() -> SharedState {
        test_state(
            StubEmbedder::always(Embedding::new(vec![0.1, 0.0, 0.0])),
            FakeCamera::frames(50),
        )
    }

    #[tokio::test]
    async fn test_status() {
        let response = router(matching_state()).oneshot(get("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["store"], "memory");
        assert_eq!(body["distance_threshold"], 10.0);
        assert_eq!(body["camera"], "/dev/fake");
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let response = router(matching_state())
            .oneshot(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("name=Nobody"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "user not found");
    }

    #[tokio::test]
    async fn test_scan_requires_login() {
        let body = multipart(&[("uploaded_image", Some("scan.png"), &png())]);
        let response = router(matching_state())
            .oneshot(multipart_request("/scan", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_scan_marks_present_once() {
        let state = matching_state();
        let cookie = login(&state, "Ada").await;

        for _ in 0..2 {
            let body = multipart(&[("uploaded_image", Some("scan.png"), &png())]);
            let response = router(state.clone())
                .oneshot(multipart_request("/scan", Some(&cookie), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                json_body(response).await["message"],
                "Present - Ada recognized at distance 0.1000"
            );
        }

        assert_eq!(state.store.list_presences().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_no_face_is_error_payload() {
        let state = test_state(StubEmbedder::no_face(), FakeCamera::frames(0));
        let cookie = login(&state, "Ada").await;

        let body = multipart(&[("uploaded_image", Some("scan.png"), &png())]);
        let response = router(state.clone())
            .oneshot(multipart_request("/scan", Some(&cookie), body))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["error"], "No face detected in the image");
    }

    #[tokio::test]
    async fn test_scan_no_match() {
        let state = test_state(
            StubEmbedder::always(Embedding::new(vec![100.0, 100.0, 100.0])),
            FakeCamera::frames(0),
        );
        let cookie = login(&state, "Tess").await;

        let body = multipart(&[("uploaded_image", Some("scan.png"), &png())]);
        let response = router(state.clone())
            .oneshot(multipart_request("/scan", Some(&cookie), body))
            .await
            .unwrap();
        let message = json_body(response).await["message"].as_str().unwrap().to_string();
        assert!(message.starts_with("No matching face found (minimum distance = 164."), "{message}");
        assert!(state.store.list_presences().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let state = matching_state();
        let body = multipart(&[
            ("name", None, b"Cy"),
            ("role", None, b"Student"),
            ("image", Some("cy.png"), &png()),
        ]);
        let response = router(state.clone())
            .oneshot(multipart_request("/register", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Registration successful for Cy!");

        let roster = state.store.list_people().await.unwrap();
        let cy = roster.iter().find(|p| p.name == "Cy").unwrap();
        assert_eq!(cy.role, Role::Student);
        login(&state, "Cy").await;
    }

    #[tokio::test]
    async fn test_register_no_face() {
        let state = test_state(StubEmbedder::no_face(), FakeCamera::frames(0));
        let body = multipart(&[
            ("name", None, b"Cy"),
            ("role", None, b"student"),
            ("image", Some("cy.png"), &png()),
        ]);
        let response = router(state.clone())
            .oneshot(multipart_request("/register", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.store.list_people().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_bad_role() {
        let body = multipart(&[
            ("name", None, b"Cy"),
            ("role", None, b"janitor"),
            ("image", Some("cy.png"), &png()),
        ]);
        let response = router(matching_state())
            .oneshot(multipart_request("/register", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_attendance_teacher_only() {
        let state = matching_state();
        let student = login(&state, "Ada").await;
        let teacher = login(&state, "Tess").await;

        let response = router(state.clone()).oneshot(get("/attendance", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router(state.clone())
            .oneshot(get("/attendance", Some(&student)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        state.scanner.identify(&Embedding::new(vec![0.0, 0.0, 0.0])).await;
        let response = router(state.clone())
            .oneshot(get("/attendance", Some(&teacher)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let records = json_body(response).await;
        assert_eq!(records.as_array().unwrap().len(), 1);
        assert_eq!(records[0]["person_id"], "ada");
        assert_eq!(records[0]["present"], true);
    }

    #[tokio::test]
    async fn test_logout_invalidates_session() {
        let state = matching_state();
        let cookie = login(&state, "Tess").await;

        let response = router(state.clone())
            .oneshot(
                Request::post("/logout")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state.clone())
            .oneshot(get("/attendance", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_recognition_feed_streams_match() {
        let state = matching_state();
        let cookie = login(&state, "Ada").await;

        let response = router(state.clone())
            .oneshot(get("/recognition_feed", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text, "data: Present - Ada recognized at distance 0.1000\n\n");
    }
}
