//! Arcane Kitchen - chat service for the mystical sous chef
//!
//! A Rust backend running one chat state machine per open view, talking to
//! the managed GraphQL backend for conversations, replies and recipes.

mod api;
mod backend;
mod config;
mod identity;
mod onboarding;
mod prompts;
mod recipe;
mod runtime;
mod session;
mod state_machine;

use api::{create_router, AppState, RecipeStoreFactory};
use backend::{
    AuthProvider, CognitoAuth, GraphqlClient, RecipeStore, SousChefCompletions, SsePushChannel,
};
use config::AppConfig;
use identity::FixedConversation;
use onboarding::{Onboarding, OnboardingStore};
use runtime::{
    Collaborators, CompletionProvider, ConversationCreator, DisabledPush, LoggingCompletions,
    LoggingCreator, PushChannel, RuntimeManager,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Session collaborators backed by the managed GraphQL API and push endpoint
fn managed_collaborators(
    config: &AppConfig,
    graphql: &GraphqlClient,
) -> Result<Collaborators, reqwest::Error> {
    let creator: Arc<dyn ConversationCreator> = match &config.conversation_id {
        Some(id) => Arc::new(FixedConversation::new(id.clone())),
        None => Arc::new(graphql.clone()),
    };

    let route = config.completion_route;
    let completions: Arc<dyn CompletionProvider> =
        Arc::new(SousChefCompletions::new(graphql.clone(), route));

    // Streams stay open for the whole session, so the push channel gets a
    // client without the request timeout
    let push: Arc<dyn PushChannel> = match &config.push_url {
        Some(url) => Arc::new(SsePushChannel::connect(url.clone(), config.http_timeout)?),
        None => {
            tracing::warn!(
                "No push endpoint configured (ARCANE_PUSH_URL); \
                 replies arrive on the direct channel only"
            );
            Arc::new(DisabledPush)
        }
    };

    Ok(Collaborators {
        creator: Arc::new(LoggingCreator::new(creator)),
        completions: Arc::new(LoggingCompletions::new(completions, route.as_str())),
        push,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arcane_kitchen=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::load()?;
    tracing::info!(
        graphql_url = %config.graphql_url,
        region = %config.region,
        primary_channel = ?config.primary_channel,
        completion_route = %config.completion_route,
        session_idle_secs = config.session_idle_timeout.as_secs(),
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.data_dir)?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let graphql = GraphqlClient::new(
        http.clone(),
        config.graphql_url.clone(),
        config.api_key.clone(),
    );
    let collaborators = managed_collaborators(&config, &graphql)?;

    if config.user_pool_id.is_none() {
        tracing::warn!("No user pool configured; profile and attribute updates will fail");
    }
    let auth: Arc<dyn AuthProvider> = Arc::new(CognitoAuth::new(http, &config.region));

    let recipes: RecipeStoreFactory = Arc::new(move |token: &str| -> Arc<dyn RecipeStore> {
        Arc::new(graphql.with_token(Some(token)))
    });

    let onboarding = Onboarding::new(OnboardingStore::new(&config.data_dir), auth.clone());

    // Create application state
    let state = AppState::new(
        RuntimeManager::new(
            collaborators,
            config.primary_channel,
            config.session_idle_timeout,
        ),
        auth,
        recipes,
        onboarding,
    );

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Arcane Kitchen server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
