//! Character onboarding and tutorial state

mod flow;
mod store;
mod tutorial;

pub use flow::{advance, OnboardingData, OnboardingProgress, OnboardingStep, StepInput};
pub use store::OnboardingStore;
pub use tutorial::{TutorialAction, TutorialStatus, TutorialTracker};

use crate::backend::AuthProvider;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Updates of one visitor run one at a time; visitors share these stripes
const LOCK_STRIPES: usize = 32;

/// Visitor ids name files and map keys: `[A-Za-z0-9_-]{1,128}`
pub fn validate_visitor(visitor: &str) -> Result<(), OnboardingError> {
    let valid = !visitor.is_empty()
        && visitor.len() <= 128
        && visitor
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(OnboardingError::InvalidVisitor(visitor.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("{0}")]
    Validation(String),
    #[error("Cannot {action} during the {step:?} step")]
    InvalidStep {
        step: OnboardingStep,
        action: &'static str,
    },
    #[error("Invalid visitor id '{0}'")]
    InvalidVisitor(String),
    #[error("Failed to store onboarding progress: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Stored onboarding progress is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Wizard driver: persists progress and publishes the finished character
pub struct Onboarding {
    store: OnboardingStore,
    auth: Arc<dyn AuthProvider>,
    locks: Vec<Mutex<()>>,
}

impl Onboarding {
    pub fn new(store: OnboardingStore, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            store,
            auth,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock_for(&self, visitor: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        visitor.hash(&mut hasher);
        // The remainder is below LOCK_STRIPES, so it fits in usize
        #[allow(clippy::cast_possible_truncation)]
        let stripe = (hasher.finish() % LOCK_STRIPES as u64) as usize;
        &self.locks[stripe]
    }

    pub async fn progress(&self, visitor: &str) -> Result<OnboardingProgress, OnboardingError> {
        self.store.load(visitor).await
    }

    /// Apply one wizard action; `token` is set for signed-in visitors
    pub async fn step(
        &self,
        visitor: &str,
        input: StepInput,
        token: Option<&str>,
    ) -> Result<OnboardingProgress, OnboardingError> {
        // Read-modify-write; concurrent steps of one visitor must not interleave
        let _guard = self.lock_for(visitor).lock().await;
        let current = self.store.load(visitor).await?;
        let next = advance(&current, input, token.is_some())?;
        self.store.save(visitor, &next).await?;

        tracing::debug!(visitor, from = ?current.step, to = ?next.step, "Onboarding step");

        if next.step == OnboardingStep::Done && current.step != OnboardingStep::Done {
            if let Some(token) = token {
                self.publish_character(token, &next.data).await;
            }
        }
        Ok(next)
    }

    pub async fn reset(&self, visitor: &str) -> Result<(), OnboardingError> {
        let _guard = self.lock_for(visitor).lock().await;
        self.store.clear(visitor).await
    }

    /// Push the character to the identity provider; failures are only logged
    async fn publish_character(&self, token: &str, data: &OnboardingData) {
        if data.name.is_empty() || data.avatar.is_empty() {
            return;
        }
        let attributes = character_attributes(data);
        if let Err(e) = self.auth.update_attributes(token, &attributes).await {
            tracing::error!(
                error = %e,
                kind = ?e.kind,
                "Failed to save character data to user attributes"
            );
        }
    }
}

/// User attributes describing the onboarded character
pub fn character_attributes(data: &OnboardingData) -> HashMap<String, String> {
    HashMap::from([
        ("given_name".to_string(), data.name.clone()),
        ("picture".to_string(), data.avatar.clone()),
        (
            "custom:cooking_style".to_string(),
            data.cooking_style.clone().unwrap_or_default(),
        ),
        (
            "custom:magical_specialty".to_string(),
            data.magical_specialty.clone().unwrap_or_default(),
        ),
        (
            "custom:favorite_ingredients".to_string(),
            data.favorite_ingredients.join(","),
        ),
    ])
}
