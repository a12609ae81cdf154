//! Onboarding wizard steps
//!
//! welcome -> avatar -> name -> account -> done, with a login side branch
//! (welcome -> login -> done). Signed-in visitors skip the account step.

use super::OnboardingError;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum OnboardingStep {
    #[default]
    Welcome,
    Avatar,
    Name,
    Account,
    Login,
    Done,
}

/// Character details collected by the wizard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OnboardingData {
    pub avatar: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cooking_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub magical_specialty: Option<String>,
    #[serde(default)]
    pub favorite_ingredients: Vec<String>,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OnboardingProgress {
    pub step: OnboardingStep,
    pub data: OnboardingData,
}

/// Visitor action on the current step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepInput {
    Continue,
    SignIn,
    Back,
    ChooseAvatar {
        avatar: String,
    },
    #[serde(rename_all = "camelCase")]
    EnterName {
        name: String,
        #[serde(default)]
        cooking_style: Option<String>,
        #[serde(default)]
        magical_specialty: Option<String>,
        #[serde(default)]
        favorite_ingredients: Vec<String>,
    },
    AccountCreated,
    LoggedIn,
}

impl StepInput {
    pub fn name(&self) -> &'static str {
        match self {
            StepInput::Continue => "continue",
            StepInput::SignIn => "sign_in",
            StepInput::Back => "back",
            StepInput::ChooseAvatar { .. } => "choose_avatar",
            StepInput::EnterName { .. } => "enter_name",
            StepInput::AccountCreated => "account_created",
            StepInput::LoggedIn => "logged_in",
        }
    }
}

/// Apply one action to the wizard
pub fn advance(
    progress: &OnboardingProgress,
    input: StepInput,
    authenticated: bool,
) -> Result<OnboardingProgress, OnboardingError> {
    let mut data = progress.data.clone();
    let step = match (progress.step, input) {
        (OnboardingStep::Welcome, StepInput::Continue) => OnboardingStep::Avatar,
        (OnboardingStep::Welcome, StepInput::SignIn) => OnboardingStep::Login,

        (OnboardingStep::Login | OnboardingStep::Avatar, StepInput::Back) => {
            OnboardingStep::Welcome
        }
        (OnboardingStep::Login, StepInput::LoggedIn) => OnboardingStep::Done,

        (OnboardingStep::Avatar, StepInput::ChooseAvatar { avatar }) => {
            let avatar = avatar.trim();
            if avatar.is_empty() {
                return Err(OnboardingError::Validation("Please choose an avatar.".to_string()));
            }
            data.avatar = avatar.to_string();
            OnboardingStep::Name
        }

        (OnboardingStep::Name, StepInput::Back) => OnboardingStep::Avatar,
        (
            OnboardingStep::Name,
            StepInput::EnterName {
                name,
                cooking_style,
                magical_specialty,
                favorite_ingredients,
            },
        ) => {
            let name = name.trim();
            if name.is_empty() {
                return Err(OnboardingError::Validation("Name is required.".to_string()));
            }
            data.name = name.to_string();
            data.cooking_style = cooking_style.filter(|s| !s.trim().is_empty());
            data.magical_specialty = magical_specialty.filter(|s| !s.trim().is_empty());
            data.favorite_ingredients = favorite_ingredients
                .into_iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect();
            if authenticated {
                OnboardingStep::Done
            } else {
                OnboardingStep::Account
            }
        }

        (OnboardingStep::Account, StepInput::Back) => OnboardingStep::Name,
        (OnboardingStep::Account, StepInput::AccountCreated) => OnboardingStep::Done,

        (step, input) => {
            return Err(OnboardingError::InvalidStep {
                step,
                action: input.name(),
            })
        }
    };

    data.is_completed = step == OnboardingStep::Done;
    Ok(OnboardingProgress { step, data })
}
