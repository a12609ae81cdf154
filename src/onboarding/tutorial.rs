//! Post-login tutorial visibility
//!
//! Session-only: every visitor sees the tutorial on their first check until
//! they complete or skip it. Nothing is persisted.

use super::{validate_visitor, OnboardingError};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use tokio::sync::Mutex;
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TutorialStatus {
    pub should_show: bool,
    pub has_checked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TutorialAction {
    Complete,
    Skip,
    /// Check again, e.g. right after account creation
    Recheck,
}

impl FromStr for TutorialAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(TutorialAction::Complete),
            "skip" => Ok(TutorialAction::Skip),
            "recheck" => Ok(TutorialAction::Recheck),
            other => Err(format!("unknown tutorial action '{other}'")),
        }
    }
}

/// Visitors remembered at once; the oldest is forgotten beyond this
pub const MAX_TRACKED_VISITORS: usize = 10_000;

#[derive(Debug, Default)]
struct Visitors {
    status: HashMap<String, TutorialStatus>,
    /// First-seen order, oldest first
    order: VecDeque<String>,
}

impl Visitors {
    fn entry(&mut self, visitor: &str, capacity: usize) -> &mut TutorialStatus {
        if !self.status.contains_key(visitor) {
            while self.status.len() >= capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.status.remove(&oldest);
            }
            self.order.push_back(visitor.to_string());
        }
        self.status.entry(visitor.to_string()).or_default()
    }
}

#[derive(Debug)]
pub struct TutorialTracker {
    visitors: Mutex<Visitors>,
    capacity: usize,
}

impl Default for TutorialTracker {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_VISITORS)
    }
}

impl TutorialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            visitors: Mutex::new(Visitors::default()),
            capacity: capacity.max(1),
        }
    }

    /// Current status; the first check of a visitor turns the tutorial on
    pub async fn check(&self, visitor: &str) -> Result<TutorialStatus, OnboardingError> {
        validate_visitor(visitor)?;
        let mut visitors = self.visitors.lock().await;
        let status = visitors.entry(visitor, self.capacity);
        if !status.has_checked {
            *status = TutorialStatus {
                should_show: true,
                has_checked: true,
            };
        }
        Ok(*status)
    }

    pub async fn apply(
        &self,
        visitor: &str,
        action: TutorialAction,
    ) -> Result<TutorialStatus, OnboardingError> {
        validate_visitor(visitor)?;
        let mut visitors = self.visitors.lock().await;
        let status = visitors.entry(visitor, self.capacity);
        *status = match action {
            TutorialAction::Complete | TutorialAction::Skip => TutorialStatus {
                should_show: false,
                has_checked: true,
            },
            TutorialAction::Recheck => TutorialStatus {
                should_show: true,
                has_checked: true,
            },
        };
        Ok(*status)
    }
}
