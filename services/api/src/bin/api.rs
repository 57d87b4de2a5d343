//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        assistant_llm::OpenAiAssistantAdapter, db::DbAdapter, title_llm::OpenAiTitleAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        middleware::require_auth,
        rest::{
            create_subject_handler, delete_conversation_handler, delete_file_handler,
            delete_subject_handler, feedback_handler, list_files_handler, list_messages_handler,
            list_subjects_handler, pin_conversation_handler, pin_subject_handler,
            retry_file_handler, tag_file_handler, update_subject_handler, upload_file_handler,
            ApiDoc,
        },
        state::AppState,
        ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let assistant_adapter = Arc::new(OpenAiAssistantAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
    ));
    let title_adapter = Arc::new(OpenAiTitleAdapter::new(
        openai_client.clone(),
        config.title_model.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        config: config.clone(),
        assistant_adapter,
        title_adapter,
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {}", e)))?,
        )
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/subjects",
            get(list_subjects_handler).post(create_subject_handler),
        )
        .route(
            "/subjects/{subject_id}",
            patch(update_subject_handler).delete(delete_subject_handler),
        )
        .route("/subjects/{subject_id}/pin", post(pin_subject_handler))
        .route(
            "/subjects/{subject_id}/files",
            get(list_files_handler).post(upload_file_handler),
        )
        .route(
            "/conversations/{conversation_id}",
            delete(delete_conversation_handler),
        )
        .route(
            "/conversations/{conversation_id}/pin",
            post(pin_conversation_handler),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(list_messages_handler),
        )
        .route("/files/{file_id}/tag", post(tag_file_handler))
        .route("/files/{file_id}/retry", post(retry_file_handler))
        .route("/files/{file_id}", delete(delete_file_handler))
        .route("/feedback", post(feedback_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
