//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ErrorResponse, ProfileResponse, QuickMessagesResponse, RecipeListResponse, SendRequest,
    SendResponse, SuccessResponse,
};
use super::AppState;
use crate::backend::{BackendError, BackendErrorKind};
use crate::onboarding::{
    OnboardingError, OnboardingProgress, StepInput, TutorialAction, TutorialStatus,
};
use crate::prompts::QUICK_MESSAGES;
use crate::recipe::{Recipe, RecipeDraft};
use crate::runtime::{DispatchError, SessionHandle, SessionView};
use crate::state_machine::TransitionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

/// Optional `Authorization: Bearer <token>`; absent means guest
type BearerAuth = Option<TypedHeader<Authorization<Bearer>>>;

fn bearer(auth: &BearerAuth) -> Option<&str> {
    auth.as_ref().map(|TypedHeader(header)| header.token())
}

fn require_token(auth: &BearerAuth) -> Result<&str, AppError> {
    bearer(auth).ok_or_else(|| AppError::Unauthorized("Sign in required".to_string()))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Chat sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/api/sessions/:id/messages", post(send_message))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/quick-messages", get(quick_messages))
        // Profile
        .route("/api/me", get(current_user))
        // Onboarding and tutorial
        .route("/api/onboarding/:visitor", get(get_onboarding))
        .route("/api/onboarding/:visitor/step", post(onboarding_step))
        .route("/api/onboarding/:visitor/reset", post(reset_onboarding))
        .route("/api/tutorial/:visitor", get(get_tutorial))
        .route("/api/tutorial/:visitor/:action", post(update_tutorial))
        // Recipes
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Chat Sessions
// ============================================================

async fn session(state: &AppState, id: &str) -> Result<SessionHandle, AppError> {
    state
        .runtime
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {id}")))
}

async fn create_session(
    State(state): State<AppState>,
    auth: BearerAuth,
) -> (StatusCode, Json<SessionView>) {
    let handle = state.runtime.create().await;
    let open_sessions = state.runtime.len().await;
    tracing::info!(
        session_id = %handle.id(),
        signed_in = auth.is_some(),
        open_sessions = open_sessions,
        "Session opened"
    );
    (StatusCode::CREATED, Json(handle.view()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session(&state, &id).await?.view()))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = session(&state, &id).await?;

    // Subscribe before the snapshot so no update falls between them
    let broadcast_rx = handle.subscribe();
    Ok(sse_stream(handle.view(), broadcast_rx))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: BearerAuth,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendResponse>), AppError> {
    let handle = session(&state, &id).await?;

    let message_id = if let Some(token) = bearer(&auth) {
        Some(handle.send(req.text, Some(token)).await?)
    } else {
        handle.send_as_guest(req.text).await?;
        None
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(SendResponse {
            accepted: true,
            message_id,
        }),
    ))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let handle = session(&state, &id).await?;
    handle.reset().await?;
    Ok(Json(handle.view()))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.runtime.remove(&id).await {
        tracing::info!(session_id = %id, "Session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Session not found: {id}")))
    }
}

async fn quick_messages() -> Json<QuickMessagesResponse> {
    Json(QuickMessagesResponse {
        messages: QUICK_MESSAGES.to_vec(),
    })
}

// ============================================================
// Profile
// ============================================================

async fn current_user(
    State(state): State<AppState>,
    auth: BearerAuth,
) -> Result<Json<ProfileResponse>, AppError> {
    let token = require_token(&auth)?;
    let profile = state.auth.current_user(token).await?;
    let display_name = profile.display_name().to_string();
    tracing::debug!(user_id = %profile.user_id, name = %display_name, "Profile loaded");
    Ok(Json(ProfileResponse {
        profile,
        display_name,
    }))
}

// ============================================================
// Onboarding
// ============================================================

async fn get_onboarding(
    State(state): State<AppState>,
    Path(visitor): Path<String>,
) -> Result<Json<OnboardingProgress>, AppError> {
    Ok(Json(state.onboarding.progress(&visitor).await?))
}

async fn onboarding_step(
    State(state): State<AppState>,
    Path(visitor): Path<String>,
    auth: BearerAuth,
    Json(input): Json<StepInput>,
) -> Result<Json<OnboardingProgress>, AppError> {
    let progress = state
        .onboarding
        .step(&visitor, input, bearer(&auth))
        .await?;
    Ok(Json(progress))
}

async fn reset_onboarding(
    State(state): State<AppState>,
    Path(visitor): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.onboarding.reset(&visitor).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_tutorial(
    State(state): State<AppState>,
    Path(visitor): Path<String>,
) -> Result<Json<TutorialStatus>, AppError> {
    Ok(Json(state.tutorial.check(&visitor).await?))
}

async fn update_tutorial(
    State(state): State<AppState>,
    Path((visitor, action)): Path<(String, String)>,
) -> Result<Json<TutorialStatus>, AppError> {
    let action: TutorialAction = action.parse().map_err(AppError::BadRequest)?;
    Ok(Json(state.tutorial.apply(&visitor, action).await?))
}

// ============================================================
// Recipes
// ============================================================

async fn list_recipes(
    State(state): State<AppState>,
    auth: BearerAuth,
) -> Result<Json<RecipeListResponse>, AppError> {
    let token = require_token(&auth)?;
    let recipes = (state.recipes)(token).list().await?;
    Ok(Json(RecipeListResponse { recipes }))
}

async fn create_recipe(
    State(state): State<AppState>,
    auth: BearerAuth,
    Json(draft): Json<RecipeDraft>,
) -> Result<(StatusCode, Json<Recipe>), AppError> {
    let token = require_token(&auth)?;
    let draft = draft
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let recipe = (state.recipes)(token).create(&draft).await?;
    tracing::info!(recipe_id = %recipe.id, "Recipe created");
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn get_version() -> &'static str {
    concat!("arcane-kitchen ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    BadGateway(String),
    Internal(String),
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Rejected(TransitionError::EmptyInput) => {
                AppError::BadRequest(e.to_string())
            }
            DispatchError::Rejected(_) => AppError::Conflict(e.to_string()),
            DispatchError::Closed => AppError::Gone(e.to_string()),
        }
    }
}

impl From<BackendError> for AppError {
    fn from(e: BackendError) -> Self {
        match e.kind {
            BackendErrorKind::Unauthorized => AppError::Unauthorized(e.message),
            BackendErrorKind::AccessDenied => AppError::Forbidden(e.message),
            BackendErrorKind::Validation => AppError::BadRequest(e.message),
            _ => {
                tracing::warn!(kind = ?e.kind, error = %e, "Backend call failed");
                AppError::BadGateway(e.message)
            }
        }
    }
}

impl From<OnboardingError> for AppError {
    fn from(e: OnboardingError) -> Self {
        match e {
            OnboardingError::Validation(_) | OnboardingError::InvalidVisitor(_) => {
                AppError::BadRequest(e.to_string())
            }
            OnboardingError::InvalidStep { .. } => AppError::Conflict(e.to_string()),
            OnboardingError::Storage(_) | OnboardingError::Corrupt(_) => {
                tracing::error!(error = %e, "Onboarding storage failure");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Gone(msg) => (StatusCode::GONE, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
