mod auth;
mod classify;
mod config;
mod db;
mod leaderboard;
mod ledger;
mod map;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::{App, HttpServer};
use auth::cognito_service::{CognitoService, EmailAuth, IdentityProvider};
use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use aws_config::BehaviorVersion;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use classify::inference::GeminiClient;
use classify::ClassificationService;
use config::{AppConfig, StoreConfig};
use db::dynamodb_repository::DynamoDbRepository;
use db::memory_repository::MemoryRepository;
use db::ProfileStore;
use leaderboard::LeaderboardHub;
use ledger::write_queue::WriteQueue;
use ledger::GamificationLedger;
use map::CampusMap;
use routes::{configure_routes, AppServices};
use std::io;
use std::sync::Arc;
use storage::s3_service::{ImageStore, S3Service};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

    let store: Arc<dyn ProfileStore> = match &config.store {
        StoreConfig::DynamoDb {
            users_table,
            events_table,
            leaderboard_index,
        } => {
            log::info!("Using DynamoDB tables {} and {}", users_table, events_table);
            Arc::new(DynamoDbRepository::new(
                DynamoDbClient::new(&aws_config),
                users_table.clone(),
                events_table.clone(),
                leaderboard_index.clone(),
            ))
        }
        StoreConfig::Memory => {
            log::warn!("Using the in-memory store; profiles and history are lost on restart");
            Arc::new(MemoryRepository::new())
        }
    };

    let images: Option<Arc<dyn ImageStore>> = config.s3_bucket.as_ref().map(|bucket| {
        log::info!("Scan images will be kept in bucket {}", bucket);
        Arc::new(S3Service::new(S3Client::new(&aws_config), bucket.clone())) as Arc<dyn ImageStore>
    });

    let inference = GeminiClient::new(&config.inference).map_err(|e| {
        log::error!("Failed to set up the inference client: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let classifier = ClassificationService::new(Arc::new(inference), config.max_image_bytes);

    let leaderboard = Arc::new(LeaderboardHub::new(store.clone()));
    let queue = WriteQueue::start(store.clone(), images, leaderboard.clone());
    let ledger = GamificationLedger::new(queue, config.anonymous_points);
    ledger.refresh_leaderboard();
    if config.anonymous_points {
        log::info!("Anonymous sessions earn points");
    }

    let email_auth = match &config.cognito {
        Some(cognito) => {
            log::info!("Cognito email sign-in enabled");
            let provider: Arc<dyn IdentityProvider> =
                Arc::new(CognitoService::new(CognitoClient::new(&aws_config), cognito));
            EmailAuth::new(Some(provider))
        }
        None => {
            log::warn!("COGNITO_CLIENT_ID is not set; only anonymous sign-in is available");
            EmailAuth::disabled()
        }
    };

    let campus_map = CampusMap::from_config(config.maps_api_key.clone(), config.map_locations_file.as_deref());
    if config.maps_api_key.is_none() {
        log::warn!("GOOGLE_MAPS_API_KEY is not set; the campus map will report missing configuration");
    }

    let jwt_service = JwtService::new(&config.jwt_secret);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    let services = AppServices {
        classifier,
        ledger,
        leaderboard,
        store,
        jwt: jwt_service,
        email_auth,
        map: campus_map,
    };
    let static_dir = config.static_dir.clone();

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        let services = services.clone();
        let static_dir = static_dir.clone();
        App::new()
            .wrap(auth_middleware.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(move |cfg| configure_routes(cfg, &services, static_dir.as_deref()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
