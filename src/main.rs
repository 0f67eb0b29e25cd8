use std::sync::Arc;

use axum::{routing::get, Router};
use babelroom::{rooms, store::RoomStore, transcribe::OpenAiTranscriber, translate::OpenAiTranslator, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(dotenv::var("DATABASE_URL")?.as_str())
        .await?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let api_key = dotenv::var("OPENAI_API_KEY")?;
    let base_url = dotenv::var("OPENAI_BASE_URL").ok();
    let translator = OpenAiTranslator::new(
        api_key.clone(),
        base_url.clone(),
        dotenv::var("TRANSLATION_MODEL").ok(),
    );
    let transcriber = OpenAiTranscriber::new(
        api_key,
        base_url,
        dotenv::var("TRANSCRIPTION_MODEL").ok(),
    );

    let app_state = AppState {
        store: RoomStore::new(db_pool),
        translator: Arc::new(translator),
        transcriber: Arc::new(transcriber),
    };

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(2)));

    let app = Router::new()
        .route("/", get(rooms::join_page).post(rooms::join))
        .nest("/r", rooms::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "babelroom listening");
    axum::serve(listener, app).await?;
    Ok(())
}
