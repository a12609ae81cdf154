//! GraphQL data API client
//!
//! Conversation creation, the two completion routes and recipe storage all go
//! through one endpoint. Calls authenticate with the caller's token when one
//! is bound, otherwise with the public API key.

use super::{
    BackendError, BackendErrorKind, CompletionRequest, CompletionResponse, RecipeStore,
};
use crate::identity::ConversationIdentity;
use crate::recipe::{Recipe, RecipeDraft};
use crate::runtime::{CompletionProvider, ConversationCreator};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

const CREATE_CONVERSATION: &str = r"
mutation CreateConversationSousChef {
  createConversationSousChef(input: {}) {
    id
    createdAt
  }
}";

const SEND_MESSAGE: &str = r"
mutation SendMessage($conversationId: ID!, $content: [AmplifyAIContentBlockInput!]!) {
  sousChef(conversationId: $conversationId, content: $content) {
    id
    content {
      text
    }
    role
    createdAt
  }
}";

const ASK_WITH_HISTORY: &str = r"
query GetSousChefResponse($message: String!, $conversationHistory: AWSJSON!) {
  getSousChefResponse(message: $message, conversationHistory: $conversationHistory) {
    completion
  }
}";

const RECIPE_FIELDS: &str = "id title description ingredients instructions \
    prepTime cookTime servings isPublic createdAt updatedAt";

#[derive(Debug, Clone)]
enum Credentials {
    Anonymous,
    ApiKey(String),
    Token(String),
}

/// Client for the managed GraphQL endpoint
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlError {
    message: String,
    #[serde(default)]
    error_type: Option<String>,
}

impl GraphqlClient {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let credentials = match &api_key {
            Some(key) => Credentials::ApiKey(key.clone()),
            None => Credentials::Anonymous,
        };
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            credentials,
        }
    }

    /// Copy of this client acting on behalf of the owner of `token`
    #[must_use]
    pub fn with_token(&self, token: Option<&str>) -> Self {
        let credentials = match (token, &self.api_key) {
            (Some(token), _) => Credentials::Token(token.to_string()),
            (None, Some(key)) => Credentials::ApiKey(key.clone()),
            (None, None) => Credentials::Anonymous,
        };
        Self {
            credentials,
            ..self.clone()
        }
    }

    /// Run one operation and decode the named top-level field
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        field: &str,
    ) -> Result<T, BackendError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));
        request = match &self.credentials {
            Credentials::Anonymous => request,
            Credentials::ApiKey(key) => request.header("x-api-key", key),
            Credentials::Token(token) => request.header("Authorization", token),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(BackendError::from_status(status, &body));
        }

        let parsed: GraphqlResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::malformed(format!("Failed to parse response: {e}")))?;

        if let Some(first) = parsed.errors.first() {
            let kind = first
                .error_type
                .as_deref()
                .map_or(BackendErrorKind::Unknown, BackendErrorKind::from_graphql_type);
            return Err(BackendError::new(kind, first.message.clone()));
        }

        let value = parsed
            .data
            .and_then(|mut data| data.get_mut(field).map(Value::take))
            .filter(|value| !value.is_null())
            .ok_or_else(|| BackendError::empty_response(format!("No data for {field}")))?;

        serde_json::from_value(value)
            .map_err(|e| BackendError::malformed(format!("Unexpected {field} shape: {e}")))
    }

    pub async fn create_conversation(&self) -> Result<ConversationIdentity, BackendError> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let created: Created = self
            .execute(CREATE_CONVERSATION, json!({}), "createConversationSousChef")
            .await?;
        if created.id.is_empty() {
            return Err(BackendError::empty_response("Failed to create conversation"));
        }
        Ok(ConversationIdentity::new(created.id))
    }

    /// Conversation route: the server keeps the history
    pub async fn send_message(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        self.execute(
            SEND_MESSAGE,
            json!({
                "conversationId": request.conversation_id.as_str(),
                "content": request.content,
            }),
            "sousChef",
        )
        .await
    }

    /// History route: one query carrying the message and the prior exchanges
    pub async fn ask_with_history(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        #[derive(Deserialize)]
        struct Answer {
            #[serde(default)]
            completion: Option<String>,
        }

        let history = serde_json::to_string(&request.history)
            .map_err(|e| BackendError::validation(format!("Failed to encode history: {e}")))?;
        let answer: Answer = self
            .execute(
                ASK_WITH_HISTORY,
                json!({
                    "message": request.prompt(),
                    "conversationHistory": history,
                }),
                "getSousChefResponse",
            )
            .await?;
        Ok(answer
            .completion
            .map(CompletionResponse::from_text)
            .unwrap_or_default())
    }

    pub async fn create_recipe(&self, draft: &RecipeDraft) -> Result<Recipe, BackendError> {
        let query = format!(
            "mutation CreateRecipe($input: CreateRecipeInput!) \
             {{ createRecipe(input: $input) {{ {RECIPE_FIELDS} }} }}"
        );
        self.execute(&query, json!({ "input": draft }), "createRecipe")
            .await
    }

    pub async fn list_recipes(&self) -> Result<Vec<Recipe>, BackendError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            items: Vec<Option<Recipe>>,
        }

        let query =
            format!("query ListRecipes {{ listRecipes {{ items {{ {RECIPE_FIELDS} }} }} }}");
        let page: Page = self.execute(&query, json!({}), "listRecipes").await?;
        Ok(page.items.into_iter().flatten().collect())
    }
}

#[async_trait]
impl ConversationCreator for GraphqlClient {
    async fn create(
        &self,
        access_token: Option<&str>,
    ) -> Result<ConversationIdentity, BackendError> {
        self.with_token(access_token).create_conversation().await
    }
}

#[async_trait]
impl RecipeStore for GraphqlClient {
    async fn create(&self, draft: &RecipeDraft) -> Result<Recipe, BackendError> {
        self.create_recipe(draft).await
    }

    async fn list(&self) -> Result<Vec<Recipe>, BackendError> {
        self.list_recipes().await
    }
}

/// Which GraphQL operation produces replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionRoute {
    /// `sousChef` mutation on a server-side conversation
    #[default]
    Conversation,
    /// `getSousChefResponse` query with client-supplied history
    History,
}

impl CompletionRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionRoute::Conversation => "conversation",
            CompletionRoute::History => "history",
        }
    }
}

impl FromStr for CompletionRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conversation" => Ok(CompletionRoute::Conversation),
            "history" => Ok(CompletionRoute::History),
            other => Err(format!(
                "unknown completion route '{other}' (expected conversation or history)"
            )),
        }
    }
}

impl fmt::Display for CompletionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion provider over one of the GraphQL routes
pub struct SousChefCompletions {
    client: GraphqlClient,
    route: CompletionRoute,
}

impl SousChefCompletions {
    pub fn new(client: GraphqlClient, route: CompletionRoute) -> Self {
        Self { client, route }
    }
}

#[async_trait]
impl CompletionProvider for SousChefCompletions {
    async fn complete(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError> {
        let client = self.client.with_token(access_token);
        match self.route {
            CompletionRoute::Conversation => client.send_message(request).await,
            CompletionRoute::History => client.ask_with_history(request).await,
        }
    }
}
