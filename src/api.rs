//! HTTP API for Arcane Kitchen
//!
//! Sessions, onboarding, tutorial status, recipes and the user profile.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::backend::{AuthProvider, RecipeStore};
use crate::onboarding::{Onboarding, TutorialTracker};
use crate::runtime::RuntimeManager;
use std::sync::Arc;

/// Builds a recipe store bound to the caller's token
pub type RecipeStoreFactory = Arc<dyn Fn(&str) -> Arc<dyn RecipeStore> + Send + Sync>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    pub auth: Arc<dyn AuthProvider>,
    pub recipes: RecipeStoreFactory,
    pub onboarding: Arc<Onboarding>,
    pub tutorial: Arc<TutorialTracker>,
}

impl AppState {
    pub fn new(
        runtime: RuntimeManager,
        auth: Arc<dyn AuthProvider>,
        recipes: RecipeStoreFactory,
        onboarding: Onboarding,
    ) -> Self {
        Self {
            runtime: Arc::new(runtime),
            auth,
            recipes,
            onboarding: Arc::new(onboarding),
            tutorial: Arc::new(TutorialTracker::new()),
        }
    }
}
