use super::jwt::JwtService;
use super::models::Session;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ok, ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Attaches a [`Session`] to requests carrying a valid Bearer token.
///
/// The middleware never rejects a request. A missing header, or one that is
/// malformed, expired or revoked, leaves the request without a session;
/// handlers that need identity refuse it through [`AuthenticatedUser`].
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Arc<JwtService>,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Arc::new(jwt_service),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
            jwt_service: self.jwt_service.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    jwt_service: Arc<JwtService>,
}

#[derive(Debug)]
enum TokenRejection {
    InvalidHeaderFormat,
    NotBearerToken,
    VerificationFailed(String),
}

impl TokenRejection {
    fn log_message(&self, path: &str) -> String {
        match self {
            TokenRejection::InvalidHeaderFormat => format!("Invalid Authorization header format (non-UTF-8) for path: {}", path),
            TokenRejection::NotBearerToken => format!("Authorization header for path {} doesn't start with 'Bearer '", path),
            TokenRejection::VerificationFailed(e) => format!("JWT token verification failed for path {}: {}", path, e),
        }
    }
}

/// `Ok(None)` when the request carries no token at all.
fn session_from_request(req: &ServiceRequest, jwt_service: &JwtService) -> Result<Option<Session>, TokenRejection> {
    let Some(auth_header) = req.headers().get("Authorization") else {
        return Ok(None);
    };
    let auth_str = auth_header.to_str().map_err(|_| TokenRejection::InvalidHeaderFormat)?;
    let token = auth_str.strip_prefix("Bearer ").ok_or(TokenRejection::NotBearerToken)?;

    log::debug!("Found Bearer token, verifying...");
    let session = jwt_service
        .verify_token(token)
        .map_err(|e| TokenRejection::VerificationFailed(e.to_string()))?;

    log::debug!("JWT token verified for user: {}", session.uid);
    Ok(Some(session))
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();

        Box::pin(async move {
            match session_from_request(&req, &jwt_service) {
                Ok(Some(session)) => {
                    req.extensions_mut().insert(session);
                }
                Ok(None) => {}
                Err(rejection) => {
                    // Stale tokens count as absent.
                    log::warn!("{}", rejection.log_message(req.path()));
                }
            }
            service.call(req).await
        })
    }
}

/// Requires a session; 401 otherwise.
pub struct AuthenticatedUser(pub Session);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<Session>() {
            Some(session) => ok(AuthenticatedUser(session.clone())),
            None => {
                log::debug!("No session for protected path: {}", req.path());
                let response = HttpResponse::Unauthorized().json(serde_json::json!({"error": "Authentication required"}));
                ready(Err(actix_web::error::InternalError::from_response("Authentication required", response).into()))
            }
        }
    }
}

/// The session, if any. Never fails.
pub struct MaybeSession(pub Option<Session>);

impl FromRequest for MaybeSession {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ok(MaybeSession(req.extensions().get::<Session>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App};

    async fn whoami(session: MaybeSession) -> HttpResponse {
        match session.0 {
            Some(session) => HttpResponse::Ok().body(session.uid),
            None => HttpResponse::Ok().body("nobody"),
        }
    }

    async fn private(user: AuthenticatedUser) -> HttpResponse {
        HttpResponse::Ok().body(user.0.uid)
    }

    #[actix_web::test]
    async fn token_is_optional_and_bad_tokens_count_as_none() {
        let jwt = JwtService::new("secret");
        let (token, session) = jwt.issue_anonymous().unwrap();
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt.clone()))
                .route("/whoami", web::get().to(whoami))
                .route("/private", web::get().to(private)),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "nobody");

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, session.uid.as_bytes());

        for header in ["Bearer not.a.token", "Basic abc"] {
            let req = test::TestRequest::get()
                .uri("/whoami")
                .insert_header(("Authorization", header))
                .to_request();
            assert_eq!(test::call_and_read_body(&app, req).await, "nobody");

            let req = test::TestRequest::get()
                .uri("/private")
                .insert_header(("Authorization", header))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
        }

        let req = test::TestRequest::get().uri("/private").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn revoked_token_loses_its_session() {
        let jwt = JwtService::new("secret");
        let (token, session) = jwt.issue_anonymous().unwrap();
        jwt.revoke(&session);
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt.clone()))
                .route("/whoami", web::get().to(whoami))
                .route("/private", web::get().to(private)),
        )
        .await;

        let bearer = format!("Bearer {}", token);
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "nobody");

        let req = test::TestRequest::get()
            .uri("/private")
            .insert_header(("Authorization", bearer))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
