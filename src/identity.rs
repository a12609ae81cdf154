//! Conversation identity resolution
//!
//! A session's remote conversation is created lazily on the first outgoing
//! message and reused afterwards. The runtime serializes turns, so at most
//! one creation is in flight per session.

use crate::backend::BackendError;
use crate::runtime::ConversationCreator;
use crate::session::Session;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use ts_rs::TS;

/// Opaque token correlating a local session with a remote conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct ConversationIdentity(String);

impl ConversationIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a non-blocking resolution attempt
pub enum Resolution {
    /// Identity already bound to the session
    Ready(ConversationIdentity),
    /// Creation must run; the future is detached from the session
    Pending(BoxFuture<'static, Result<ConversationIdentity, BackendError>>),
}

/// Produces the stable identity for a session's remote conversation
pub struct IdentityResolver<C: ConversationCreator + 'static> {
    creator: Arc<C>,
}

impl<C: ConversationCreator + 'static> IdentityResolver<C> {
    pub fn new(creator: C) -> Self {
        Self {
            creator: Arc::new(creator),
        }
    }

    /// Return the bound identity, or a creation future to run elsewhere
    ///
    /// The caller binds the created identity once it arrives. Never call this
    /// again for the same session until that creation has settled.
    pub fn prepare(&self, session: &Session, access_token: Option<&str>) -> Resolution {
        if let Some(identity) = session.identity() {
            return Resolution::Ready(identity.clone());
        }
        let creator = Arc::clone(&self.creator);
        let access_token = access_token.map(str::to_string);
        Resolution::Pending(Box::pin(async move { creator.create(access_token.as_deref()).await }))
    }
}

/// Creator that always yields a configured, well-known conversation id
pub struct FixedConversation {
    identity: ConversationIdentity,
}

impl FixedConversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            identity: ConversationIdentity::new(id),
        }
    }
}

#[async_trait]
impl ConversationCreator for FixedConversation {
    async fn create(
        &self,
        _access_token: Option<&str>,
    ) -> Result<ConversationIdentity, BackendError> {
        Ok(self.identity.clone())
    }
}
