//! Managed backend collaborators
//!
//! Adapters for the GraphQL data API, the identity provider and the push
//! endpoint. Each one fails fast with a classified `BackendError`.

mod cognito;
mod error;
mod graphql;
mod push;
mod types;

pub use cognito::CognitoAuth;
pub use error::{BackendError, BackendErrorKind};
pub use graphql::{CompletionRoute, GraphqlClient, SousChefCompletions};
pub use push::SsePushChannel;
pub use types::*;

use crate::recipe::{Recipe, RecipeDraft};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity provider for signed-in users
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Profile of the user owning `access_token`
    async fn current_user(&self, access_token: &str) -> Result<UserProfile, BackendError>;

    /// Update user attributes (`given_name`, `picture`, `custom:*`)
    async fn update_attributes(
        &self,
        access_token: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), BackendError>;
}

/// Recipe persistence, scoped to one caller
#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn create(&self, draft: &RecipeDraft) -> Result<Recipe, BackendError>;
    async fn list(&self) -> Result<Vec<Recipe>, BackendError>;
}

#[async_trait]
impl<T: AuthProvider + ?Sized> AuthProvider for Arc<T> {
    async fn current_user(&self, access_token: &str) -> Result<UserProfile, BackendError> {
        (**self).current_user(access_token).await
    }

    async fn update_attributes(
        &self,
        access_token: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), BackendError> {
        (**self).update_attributes(access_token, attributes).await
    }
}

#[async_trait]
impl<T: RecipeStore + ?Sized> RecipeStore for Arc<T> {
    async fn create(&self, draft: &RecipeDraft) -> Result<Recipe, BackendError> {
        (**self).create(draft).await
    }

    async fn list(&self) -> Result<Vec<Recipe>, BackendError> {
        (**self).list().await
    }
}
