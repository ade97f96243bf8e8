//! Asking a human whether an invocation may run.

use crate::types::ToolCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// An invocation waiting for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Invocation id
    pub id: String,
    pub tool_name: String,
    pub input: Value,
    pub category: ToolCategory,
}

/// The human's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionResponse {
    AllowOnce,
    /// Allow and remember the invocation's signature for the session.
    AllowForSession,
    Deny,
}

impl PermissionResponse {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

/// Resolves permission requests. There is no timeout; an implementation
/// may add one.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn prompt(&self, request: PermissionRequest) -> PermissionResponse;
}

/// Approves every request once.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl PermissionPrompter for AutoApprove {
    async fn prompt(&self, _request: PermissionRequest) -> PermissionResponse {
        PermissionResponse::AllowOnce
    }
}

/// Denies every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDeny;

#[async_trait]
impl PermissionPrompter for AutoDeny {
    async fn prompt(&self, _request: PermissionRequest) -> PermissionResponse {
        PermissionResponse::Deny
    }
}

/// A request handed to a UI together with the channel for its answer.
#[derive(Debug)]
pub struct PendingPermission {
    pub request: PermissionRequest,
    responder: oneshot::Sender<PermissionResponse>,
}

impl PendingPermission {
    /// Answer the request. Answers to an abandoned prompt are dropped.
    pub fn respond(self, response: PermissionResponse) {
        if self.responder.send(response).is_err() {
            log::debug!("Permission answer dropped; prompt no longer waiting id={}", self.request.id);
        }
    }
}

/// Forwards requests over a channel to a UI task.
///
/// A closed channel or a dropped [`PendingPermission`] counts as a denial.
#[derive(Debug, Clone)]
pub struct ChannelPrompter {
    tx: mpsc::Sender<PendingPermission>,
}

impl ChannelPrompter {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<PendingPermission>) -> Self {
        Self { tx }
    }

    /// Create a prompter and the receiver the UI reads requests from.
    #[must_use]
    pub fn with_channel(buffer_size: usize) -> (Self, mpsc::Receiver<PendingPermission>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl PermissionPrompter for ChannelPrompter {
    async fn prompt(&self, request: PermissionRequest) -> PermissionResponse {
        let id = request.id.clone();
        let (responder, answer) = oneshot::channel();
        if self.tx.send(PendingPermission { request, responder }).await.is_err() {
            log::warn!("Permission channel closed, denying id={id}");
            return PermissionResponse::Deny;
        }
        answer.await.unwrap_or_else(|_| {
            log::warn!("Permission request abandoned, denying id={id}");
            PermissionResponse::Deny
        })
    }
}
