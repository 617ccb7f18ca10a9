use actix_web::{web, HttpResponse, Result};
use log::{error, info, warn};

use crate::db::ProfileStore;
use crate::ledger::GamificationLedger;

use super::cognito_service::{AuthError, EmailAuth};
use super::jwt::JwtService;
use super::middleware::AuthenticatedUser;
use super::models::{AuthResponse, AuthUser, LoginRequest, MeResponse, ProviderIdentity, SignUpRequest};

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn configure_auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/signup", web::post().to(signup))
            .route("/login", web::post().to(login))
            .route("/anonymous", web::post().to(anonymous))
            .route("/me", web::get().to(me))
            .route("/logout", web::post().to(logout)),
    );
}

fn auth_error_response(err: &AuthError) -> HttpResponse {
    let body = ErrorResponse { error: err.to_string() };
    match err {
        AuthError::DuplicateAccount(_) => HttpResponse::Conflict().json(body),
        AuthError::AuthFailure(_) => HttpResponse::Unauthorized().json(body),
    }
}

fn start_session(
    jwt_service: &JwtService,
    ledger: &GamificationLedger,
    identity: Option<&ProviderIdentity>,
) -> HttpResponse {
    let issued = match identity {
        Some(identity) => jwt_service.issue_member(identity),
        None => jwt_service.issue_anonymous(),
    };
    match issued {
        Ok((token, session)) => {
            ledger.bootstrap_profile(&session);
            info!("Session started for {} (anonymous: {})", session.uid, session.is_anonymous);
            HttpResponse::Ok().json(AuthResponse {
                token,
                user: AuthUser::from(&session),
            })
        }
        Err(e) => {
            error!("Failed to issue session token: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to start session".to_string(),
            })
        }
    }
}

pub async fn signup(
    body: web::Json<SignUpRequest>,
    email_auth: web::Data<EmailAuth>,
    jwt_service: web::Data<JwtService>,
    ledger: web::Data<GamificationLedger>,
) -> Result<HttpResponse> {
    let display_name = body.display_name.trim();
    if display_name.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Please enter a display name.".to_string(),
        }));
    }

    let provider = match email_auth.provider() {
        Ok(provider) => provider,
        Err(e) => return Ok(auth_error_response(&e)),
    };

    let outcome = match provider.sign_up(&body.email, &body.password, display_name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Sign-up failed: {}", e);
            return Ok(auth_error_response(&e));
        }
    };

    if !outcome.confirmed {
        info!("Sign-up for {} awaits confirmation", outcome.uid);
        return Ok(HttpResponse::Accepted().json(serde_json::json!({
            "message": "Account created. Please confirm your email before signing in.",
            "confirmationRequired": true,
        })));
    }

    match provider.sign_in(&body.email, &body.password).await {
        Ok(identity) => Ok(start_session(&jwt_service, &ledger, Some(&identity))),
        Err(e) => {
            warn!("Sign-in after sign-up failed: {}", e);
            Ok(auth_error_response(&e))
        }
    }
}

pub async fn login(
    body: web::Json<LoginRequest>,
    email_auth: web::Data<EmailAuth>,
    jwt_service: web::Data<JwtService>,
    ledger: web::Data<GamificationLedger>,
) -> Result<HttpResponse> {
    let provider = match email_auth.provider() {
        Ok(provider) => provider,
        Err(e) => return Ok(auth_error_response(&e)),
    };

    match provider.sign_in(&body.email, &body.password).await {
        Ok(identity) => Ok(start_session(&jwt_service, &ledger, Some(&identity))),
        Err(e) => {
            warn!("Sign-in failed: {}", e);
            Ok(auth_error_response(&e))
        }
    }
}

pub async fn anonymous(
    jwt_service: web::Data<JwtService>,
    ledger: web::Data<GamificationLedger>,
) -> Result<HttpResponse> {
    Ok(start_session(&jwt_service, &ledger, None))
}

pub async fn me(
    user: AuthenticatedUser,
    store: web::Data<dyn ProfileStore>,
    ledger: web::Data<GamificationLedger>,
) -> Result<HttpResponse> {
    let session = user.0;
    log::info!("/auth/me endpoint called for user ID: {}", session.uid);

    ledger.bootstrap_profile(&session);

    let profile = match store.get_profile(&session.uid).await {
        Ok(profile) => profile,
        Err(e) => {
            error!("Failed to fetch profile for {}: {}", session.uid, e);
            None
        }
    };

    Ok(HttpResponse::Ok().json(MeResponse {
        user: AuthUser::from(&session),
        profile,
    }))
}

pub async fn logout(user: AuthenticatedUser, jwt_service: web::Data<JwtService>) -> Result<HttpResponse> {
    jwt_service.revoke(&user.0);
    info!("Session ended for {}", user.0.uid);
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "Logged out successfully"})))
}
