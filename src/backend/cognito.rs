//! Identity provider client (user pool JSON API)

use super::{AuthProvider, BackendError, BackendErrorKind, UserProfile};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";

/// User pool client authenticating with the caller's access token
#[derive(Debug, Clone)]
pub struct CognitoAuth {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Attribute {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUserResponse {
    username: String,
    #[serde(default)]
    user_attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(default, alias = "Message")]
    message: String,
}

impl CognitoAuth {
    pub fn new(client: Client, region: &str) -> Self {
        Self::with_endpoint(client, format!("https://cognito-idp.{region}.amazonaws.com/"))
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .header("Content-Type", "application/x-amz-json-1.1")
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read response: {e}")))?;

        if status.is_success() {
            return Ok(text);
        }
        Err(classify(status, &text))
    }
}

/// Map user pool error types onto backend error kinds
fn classify(status: reqwest::StatusCode, body: &str) -> BackendError {
    let Ok(error) = serde_json::from_str::<ErrorBody>(body) else {
        return BackendError::from_status(status, body);
    };
    let error_type = error.error_type.rsplit('#').next().unwrap_or_default();
    let kind = match error_type {
        "NotAuthorizedException" | "UserNotFoundException" | "PasswordResetRequiredException" => {
            BackendErrorKind::Unauthorized
        }
        "InvalidParameterException" | "AliasExistsException" => BackendErrorKind::Validation,
        "TooManyRequestsException" | "InternalErrorException" => BackendErrorKind::Server,
        _ => return BackendError::from_status(status, body),
    };
    BackendError::new(kind, error.message)
}

#[async_trait]
impl AuthProvider for CognitoAuth {
    async fn current_user(&self, access_token: &str) -> Result<UserProfile, BackendError> {
        let body = self
            .call("GetUser", json!({ "AccessToken": access_token }))
            .await?;
        let user: GetUserResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::malformed(format!("Unexpected GetUser shape: {e}")))?;

        let attributes: HashMap<String, String> = user
            .user_attributes
            .into_iter()
            .map(|a| (a.name, a.value))
            .collect();
        let user_id = attributes
            .get("sub")
            .cloned()
            .unwrap_or_else(|| user.username.clone());

        Ok(UserProfile {
            user_id,
            username: user.username,
            attributes,
        })
    }

    async fn update_attributes(
        &self,
        access_token: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), BackendError> {
        let mut user_attributes: Vec<Attribute> = attributes
            .iter()
            .map(|(name, value)| Attribute {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        user_attributes.sort_by(|a, b| a.name.cmp(&b.name));

        self.call(
            "UpdateUserAttributes",
            json!({ "AccessToken": access_token, "UserAttributes": user_attributes }),
        )
        .await?;
        Ok(())
    }
}
