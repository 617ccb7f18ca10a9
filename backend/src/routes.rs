use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, Error, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use shared::{all_bin_details, bin_details, bin_details_for_token, AnalyzeResponse, LeaderboardState};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

use crate::auth::cognito_service::EmailAuth;
use crate::auth::jwt::JwtService;
use crate::auth::middleware::{AuthenticatedUser, MaybeSession};
use crate::auth::routes::configure_auth_routes;
use crate::classify::{ClassificationService, ClassifyError};
use crate::db::{ProfileStore, RepositoryError};
use crate::leaderboard::LeaderboardHub;
use crate::ledger::write_queue::ScanImage;
use crate::ledger::GamificationLedger;
use crate::map::CampusMap;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_json(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse { error: message.into() }
}

/// Everything the handlers share, built once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub classifier: ClassificationService,
    pub ledger: GamificationLedger,
    pub leaderboard: Arc<LeaderboardHub>,
    pub store: Arc<dyn ProfileStore>,
    pub jwt: JwtService,
    pub email_auth: EmailAuth,
    pub map: CampusMap,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, services: &AppServices, static_dir: Option<&str>) {
    cfg.app_data(web::Data::new(services.classifier.clone()))
        .app_data(web::Data::new(services.ledger.clone()))
        .app_data(web::Data::from(services.leaderboard.clone()))
        .app_data(web::Data::from(services.store.clone()))
        .app_data(web::Data::new(services.jwt.clone()))
        .app_data(web::Data::new(services.email_auth.clone()))
        .app_data(web::Data::new(services.map.clone()));

    cfg.service(web::resource("/api/analyze").route(web::post().to(analyze_waste)))
        .service(web::resource("/api/bins").route(web::get().to(list_bins)))
        .service(web::resource("/api/bins/{bin_color}").route(web::get().to(get_bin)))
        .service(web::resource("/api/leaderboard").route(web::get().to(get_leaderboard)))
        .service(web::resource("/api/leaderboard/stream").route(web::get().to(stream_leaderboard)))
        .service(
            web::resource("/api/profile")
                .route(web::get().to(get_profile))
                .route(web::put().to(update_profile)),
        )
        .service(web::resource("/api/history").route(web::get().to(get_history)))
        .service(web::resource("/api/map").route(web::get().to(get_map)));

    configure_auth_routes(cfg);

    if let Some(dir) = static_dir {
        cfg.service(Files::new("/", dir).index_file("index.html"));
    }
}

struct ImageUpload {
    bytes: Vec<u8>,
    mime_type: Option<String>,
}

/// Reads the `image` field. Stops buffering one byte past the limit so the
/// size check downstream still sees an oversized upload.
async fn read_image_field(payload: &mut Multipart, max_bytes: usize) -> Result<ImageUpload, ClassifyError> {
    let malformed = |e: actix_multipart::MultipartError| ClassifyError::InvalidInput(format!("Malformed upload: {}", e));

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        if field.name() != Some("image") {
            continue;
        }
        let mime_type = field.content_type().map(|mime| mime.essence_str().to_string());

        let keep = max_bytes.saturating_add(1);
        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(malformed)?;
            let room = keep.saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        return Ok(ImageUpload { bytes, mime_type });
    }

    Err(ClassifyError::InvalidInput("No image was uploaded.".into()))
}

fn classification_failure(err: ClassifyError) -> HttpResponse {
    match err {
        ClassifyError::InvalidInput(_) => {
            warn!("Rejected upload: {}", err);
            HttpResponse::BadRequest().json(error_json(err.user_message()))
        }
        _ => {
            error!("Classification failed: {}", err);
            HttpResponse::BadGateway().json(error_json(err.user_message()))
        }
    }
}

async fn analyze_waste(
    classifier: web::Data<ClassificationService>,
    ledger: web::Data<GamificationLedger>,
    session: MaybeSession,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let upload = match read_image_field(&mut payload, classifier.max_image_bytes()).await {
        Ok(upload) => upload,
        Err(e) => return Ok(classification_failure(e)),
    };

    let classified = classifier.analyze(&upload.bytes, upload.mime_type.as_deref()).await;
    let (request, result) = match classified {
        Ok(classified) => classified,
        Err(e) => return Ok(classification_failure(e)),
    };

    let image = ScanImage {
        bytes: upload.bytes,
        mime_type: request.mime_type().to_string(),
    };
    let outcome = ledger.record_scan(session.0.as_ref(), &result, Some(image));
    info!("Classified upload as {} ({:?})", result.bin_color, outcome);

    Ok(HttpResponse::Ok().json(AnalyzeResponse {
        details: bin_details(result.bin_color),
        result,
        points_awarded: outcome.points_awarded(),
    }))
}

async fn list_bins() -> HttpResponse {
    HttpResponse::Ok().json(all_bin_details())
}

async fn get_bin(path: web::Path<String>) -> HttpResponse {
    HttpResponse::Ok().json(bin_details_for_token(&path.into_inner()))
}

async fn get_leaderboard(session: MaybeSession, hub: web::Data<LeaderboardHub>) -> HttpResponse {
    let state = match session.0 {
        Some(_) => hub.current(),
        None => LeaderboardState::NotAuthenticated,
    };
    HttpResponse::Ok().json(state)
}

fn sse_event(state: &LeaderboardState) -> web::Bytes {
    match serde_json::to_string(state) {
        Ok(json) => web::Bytes::from(format!("data: {}\n\n", json)),
        Err(e) => {
            error!("Failed to serialize leaderboard snapshot: {}", e);
            web::Bytes::from_static(b": snapshot unavailable\n\n")
        }
    }
}

/// Server-sent events: the current snapshot, then one event per change until
/// the client goes away.
async fn stream_leaderboard(session: MaybeSession, hub: web::Data<LeaderboardHub>) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    response
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"));

    if session.0.is_none() {
        let event = sse_event(&LeaderboardState::NotAuthenticated);
        return response.streaming(futures::stream::once(async move { Ok::<_, Infallible>(event) }));
    }

    let updates = WatchStream::new(hub.subscribe().into_receiver()).map(|state| Ok::<_, Infallible>(sse_event(&state)));
    info!("Leaderboard subscriber attached ({} active)", hub.subscriber_count());
    response.streaming(updates)
}

fn repository_failure(context: &str, err: RepositoryError) -> HttpResponse {
    match err {
        RepositoryError::NotFound => HttpResponse::NotFound().json(error_json("Profile not found")),
        other => {
            error!("{}: {}", context, other);
            HttpResponse::InternalServerError().json(error_json(format!("{} failed", context)))
        }
    }
}

async fn get_profile(user: AuthenticatedUser, store: web::Data<dyn ProfileStore>) -> HttpResponse {
    match store.get_profile(&user.0.uid).await {
        Ok(Some(profile)) => HttpResponse::Ok().json(profile),
        Ok(None) => HttpResponse::NotFound().json(error_json("Profile not found")),
        Err(e) => repository_failure("Profile lookup", e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    display_name: String,
}

async fn update_profile(
    user: AuthenticatedUser,
    body: web::Json<UpdateProfileRequest>,
    store: web::Data<dyn ProfileStore>,
    ledger: web::Data<GamificationLedger>,
) -> HttpResponse {
    let display_name = body.display_name.trim();
    if display_name.chars().count() < 2 {
        return HttpResponse::BadRequest().json(error_json("Name must be at least 2 characters."));
    }

    if let Err(e) = store.update_display_name(&user.0.uid, display_name).await {
        return repository_failure("Profile update", e);
    }
    info!("Display name updated for {}", user.0.uid);
    ledger.refresh_leaderboard();

    match store.get_profile(&user.0.uid).await {
        Ok(Some(profile)) => HttpResponse::Ok().json(profile),
        Ok(None) => HttpResponse::NotFound().json(error_json("Profile not found")),
        Err(e) => repository_failure("Profile lookup", e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_history(
    user: AuthenticatedUser,
    query: web::Query<HistoryQuery>,
    store: web::Data<dyn ProfileStore>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    match store.list_events(&user.0.uid, limit).await {
        Ok(events) => HttpResponse::Ok().json(events),
        Err(e) => repository_failure("History lookup", e),
    }
}

async fn get_map(map: web::Data<CampusMap>) -> HttpResponse {
    HttpResponse::Ok().json(map.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::middleware::AuthMiddleware;
    use crate::auth::models::ProviderIdentity;
    use crate::classify::testing::ScriptedInference;
    use crate::db::memory_repository::MemoryRepository;
    use crate::ledger::write_queue::WriteQueue;
    use crate::map::default_locations;
    use crate::storage::s3_service::MemoryImageStore;
    use actix_web::body::MessageBody;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use shared::{UserProfile, WasteEvent};
    use std::sync::atomic::Ordering;

    const BLUE_REPLY: &str = r#"{"binColor":"Blue","ecoFact":"Recycling one can saves enough energy to run a TV for three hours."}"#;

    struct Harness {
        repo: Arc<MemoryRepository>,
        images: Arc<MemoryImageStore>,
        inference: Arc<ScriptedInference>,
        services: AppServices,
    }

    impl Harness {
        fn new(inference: ScriptedInference) -> Self {
            Self::with_max_image_bytes(inference, 1024)
        }

        fn with_max_image_bytes(inference: ScriptedInference, max_image_bytes: usize) -> Self {
            let repo = Arc::new(MemoryRepository::new());
            let images = Arc::new(MemoryImageStore::new());
            let inference = Arc::new(inference);
            let hub = Arc::new(LeaderboardHub::new(repo.clone()));
            let queue = WriteQueue::start(repo.clone(), Some(images.clone()), hub.clone());
            let services = AppServices {
                classifier: ClassificationService::new(inference.clone(), max_image_bytes),
                ledger: GamificationLedger::new(queue, false),
                leaderboard: hub,
                store: repo.clone(),
                jwt: JwtService::new("test-secret"),
                email_auth: EmailAuth::disabled(),
                map: CampusMap::new(None, default_locations()),
            };
            Self {
                repo,
                images,
                inference,
                services,
            }
        }

        fn app(
            &self,
        ) -> App<
            impl actix_web::dev::ServiceFactory<
                actix_web::dev::ServiceRequest,
                Config = (),
                Response = actix_web::dev::ServiceResponse<impl MessageBody + use<>>,
                Error = Error,
                InitError = (),
            > + use<>,
        > {
            let services = self.services.clone();
            App::new()
                .wrap(AuthMiddleware::new(self.services.jwt.clone()))
                .configure(move |cfg| configure_routes(cfg, &services, None))
        }

        async fn member(&self, uid: &str, points: u64) -> String {
            let mut profile = UserProfile::new(uid, Some(format!("{}@example.com", uid)), Some(uid.to_uppercase()), None);
            profile.points = points;
            self.repo.create_profile_if_absent(&profile).await.unwrap();
            let identity = ProviderIdentity {
                uid: uid.to_string(),
                email: Some(profile.email.clone()),
                display_name: Some(profile.display_name.clone()),
                photo_url: None,
            };
            let (token, _) = self.services.jwt.issue_member(&identity).unwrap();
            format!("Bearer {}", token)
        }
    }

    fn multipart(field: &str, content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
        let boundary = "ecosnap-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"scan.jpg\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    fn analyze_request(bearer: Option<&str>, data: &[u8]) -> test::TestRequest {
        let (content_type, body) = multipart("image", "image/jpeg", data);
        let mut req = test::TestRequest::post()
            .uri("/api/analyze")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body);
        if let Some(bearer) = bearer {
            req = req.insert_header((header::AUTHORIZATION, bearer.to_string()));
        }
        req
    }

    async fn events_for(repo: &MemoryRepository, uid: &str) -> Vec<WasteEvent> {
        repo.list_events(uid, 100).await.unwrap()
    }

    #[actix_web::test]
    async fn empty_upload_is_rejected_before_the_model() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;
        let bearer = harness.member("uid-1", 0).await;

        let resp = test::call_service(&app, analyze_request(Some(&bearer), b"").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().starts_with("Invalid image file:"));

        harness.services.ledger.drain().await;
        assert_eq!(harness.inference.calls.load(Ordering::SeqCst), 0);
        assert!(events_for(&harness.repo, "uid-1").await.is_empty());
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected_and_unbounded_limit_is_accepted() {
        let harness = Harness::with_max_image_bytes(ScriptedInference::replying(BLUE_REPLY), 4);
        let app = test::init_service(harness.app()).await;
        let resp = test::call_service(&app, analyze_request(None, b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("too large"));
        assert_eq!(harness.inference.calls.load(Ordering::SeqCst), 0);

        let harness = Harness::with_max_image_bytes(ScriptedInference::replying(BLUE_REPLY), usize::MAX);
        let app = test::init_service(harness.app()).await;
        let resp = test::call_service(&app, analyze_request(None, b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn member_scan_awards_points_and_records_history() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;
        let bearer = harness.member("uid-40", 40).await;

        let resp = test::call_service(&app, analyze_request(Some(&bearer), b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: AnalyzeResponse = test::read_body_json(resp).await;
        assert_eq!(body.result.bin_color, shared::BinColor::Blue);
        assert_eq!(body.details.label, "Recycling");
        assert_eq!(body.points_awarded, 10);

        harness.services.ledger.drain().await;
        assert_eq!(harness.repo.get_profile("uid-40").await.unwrap().unwrap().points, 50);
        let events = events_for(&harness.repo, "uid-40").await;
        assert_eq!(events.len(), 1);
        let image_key = events[0].image_ref.clone().unwrap();
        assert!(harness.images.contains(&image_key));

        let req = test::TestRequest::get()
            .uri("/api/history?limit=500")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .to_request();
        let history: Vec<WasteEvent> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history, events);

        let req = test::TestRequest::get()
            .uri("/api/leaderboard")
            .insert_header((header::AUTHORIZATION, bearer))
            .to_request();
        let board: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(board["state"], "ready");
        assert_eq!(board["entries"][0]["points"], 50);
    }

    #[actix_web::test]
    async fn unknown_bin_from_model_is_a_gateway_error_without_writes() {
        let harness = Harness::new(ScriptedInference::replying(r#"{"binColor":"Yellow","ecoFact":"x"}"#));
        let app = test::init_service(harness.app()).await;
        let bearer = harness.member("uid-40", 40).await;

        let resp = test::call_service(&app, analyze_request(Some(&bearer), b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Failed to analyze image. Please try again.");

        harness.services.ledger.drain().await;
        assert_eq!(harness.repo.get_profile("uid-40").await.unwrap().unwrap().points, 40);
        assert!(events_for(&harness.repo, "uid-40").await.is_empty());
    }

    #[actix_web::test]
    async fn unreachable_model_is_a_gateway_error() {
        let harness = Harness::new(ScriptedInference::failing("connection refused"));
        let app = test::init_service(harness.app()).await;

        let resp = test::call_service(&app, analyze_request(None, b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn scan_without_session_is_classified_but_not_scored() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;

        let resp = test::call_service(&app, analyze_request(None, b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: AnalyzeResponse = test::read_body_json(resp).await;
        assert_eq!(body.points_awarded, 0);
    }

    #[actix_web::test]
    async fn scan_with_revoked_token_is_classified_but_not_scored() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;
        let bearer = harness.member("uid-5", 20).await;
        let token = bearer.trim_start_matches("Bearer ");
        let session = harness.services.jwt.verify_token(token).unwrap();
        harness.services.jwt.revoke(&session);

        let resp = test::call_service(&app, analyze_request(Some(&bearer), b"jpeg-bytes").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: AnalyzeResponse = test::read_body_json(resp).await;
        assert_eq!(body.points_awarded, 0);

        harness.services.ledger.drain().await;
        assert_eq!(harness.repo.get_profile("uid-5").await.unwrap().unwrap().points, 20);
        assert!(events_for(&harness.repo, "uid-5").await.is_empty());
    }

    #[actix_web::test]
    async fn leaderboard_requires_a_session() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;

        let req = test::TestRequest::get().uri("/api/leaderboard").to_request();
        let board: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(board, json!({"state": "notAuthenticated"}));

        let req = test::TestRequest::get().uri("/api/leaderboard/stream").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        let body = test::read_body(resp).await;
        assert_eq!(body, "data: {\"state\":\"notAuthenticated\"}\n\n");
    }

    #[actix_web::test]
    async fn leaderboard_stream_starts_with_current_snapshot() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;
        let bearer = harness.member("uid-7", 70).await;
        harness.services.ledger.refresh_leaderboard();
        harness.services.ledger.drain().await;

        let req = test::TestRequest::get()
            .uri("/api/leaderboard/stream")
            .insert_header((header::AUTHORIZATION, bearer))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(harness.services.leaderboard.subscriber_count(), 1);

        let mut body = Box::pin(resp.into_body());
        let first = match futures::future::poll_fn(|cx| body.as_mut().poll_next(cx)).await {
            Some(Ok(bytes)) => bytes,
            _ => panic!("stream ended without a snapshot"),
        };
        let text = std::str::from_utf8(&first).unwrap();
        assert!(text.starts_with("data: {\"state\":\"ready\""));
        assert!(text.contains("\"points\":70"));

        drop(body);
        assert_eq!(harness.services.leaderboard.subscriber_count(), 0);
    }

    #[actix_web::test]
    async fn map_reports_missing_key() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;

        let req = test::TestRequest::get().uri("/api/map").to_request();
        let view: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(view["state"], "configurationMissing");
        assert!(view["message"].as_str().unwrap().contains("GOOGLE_MAPS_API_KEY"));
    }

    #[actix_web::test]
    async fn bins_are_listed_and_unknown_tokens_fall_back_to_landfill() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;

        let req = test::TestRequest::get().uri("/api/bins").to_request();
        let bins: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(bins.as_array().unwrap().len(), 3);

        let req = test::TestRequest::get().uri("/api/bins/Purple").to_request();
        let bin: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(bin["label"], "Landfill");
    }

    #[actix_web::test]
    async fn profile_name_is_validated_and_updated() {
        let harness = Harness::new(ScriptedInference::replying(BLUE_REPLY));
        let app = test::init_service(harness.app()).await;
        let bearer = harness.member("uid-3", 30).await;

        let req = test::TestRequest::put()
            .uri("/api/profile")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .set_json(json!({"displayName": " A "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Name must be at least 2 characters.");

        let req = test::TestRequest::put()
            .uri("/api/profile")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .set_json(json!({"displayName": "Ada Lovelace"}))
            .to_request();
        let profile: UserProfile = test::call_and_read_body_json(&app, req).await;
        assert_eq!(profile.display_name, "Ada Lovelace");
        assert_eq!(profile.points, 30);

        let req = test::TestRequest::get().uri("/api/profile").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
