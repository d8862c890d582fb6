use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::UserId;
use crate::ports::{Authorization, Confirmation};

/// Session and role source backed by fixed configuration.
#[derive(Debug, Default)]
pub struct StaticAuthorization {
    viewer: RwLock<Option<UserId>>,
    admins: HashSet<UserId>,
}

impl StaticAuthorization {
    pub fn new(viewer: Option<UserId>, admins: HashSet<UserId>) -> Self {
        Self {
            viewer: RwLock::new(viewer),
            admins,
        }
    }

    /// Sign in as `viewer`, or sign out with `None`.
    pub async fn set_viewer(&self, viewer: Option<UserId>) {
        *self.viewer.write().await = viewer;
    }
}

#[async_trait]
impl Authorization for StaticAuthorization {
    async fn current_viewer(&self) -> Option<UserId> {
        self.viewer.read().await.clone()
    }

    async fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }
}

/// Confirmation gate with a preset answer, set before each destructive call.
#[derive(Debug, Default)]
pub struct PresetConfirmation {
    answer: AtomicBool,
}

impl PresetConfirmation {
    pub fn new(answer: bool) -> Self {
        Self {
            answer: AtomicBool::new(answer),
        }
    }

    pub fn set(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }
}

#[async_trait]
impl Confirmation for PresetConfirmation {
    async fn confirm(&self, prompt: &str) -> bool {
        let answer = self.answer.load(Ordering::SeqCst);
        tracing::debug!(prompt, answer, "confirmation");
        answer
    }
}
