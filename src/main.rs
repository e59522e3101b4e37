use ketabsearch::{config, http, logging, startup};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_settings();
    let settings = config::get_settings();
    logging::init_tracing(&settings.log_level);

    tracing::info!(
        chroma = %settings.chroma_base_url(),
        collection = %settings.chroma_collection,
        redis = %settings.redis_dsn(),
        embedding_provider = %settings.embedding_provider,
        embedding_model = %settings.embedding_model,
        api_auth = settings.enable_api_auth,
        "Starting Ketab search service"
    );

    let state = match startup::build_state(settings.clone()).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };

    let app = http::create_router(state);
    let listener = TcpListener::bind((settings.app_host.as_str(), settings.app_port))
        .await
        .expect("Failed to bind listener");
    tracing::info!(
        "Listening on http://{}:{}",
        settings.app_host,
        settings.app_port
    );
    axum::serve(listener, app).await.unwrap();
}
