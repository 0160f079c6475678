use serde::Serialize;
use std::sync::RwLock;
use tracing::info;

/// Microphone permission as reported by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Never asked; a request prompts the user
    Undetermined,
}

/// Host platform microphone permission boundary
#[async_trait::async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Current permission without prompting
    fn status(&self) -> PermissionStatus;

    /// Ask the user; returns the resulting status
    async fn request(&self) -> PermissionStatus;
}

/// Desktop hosts have no per-app microphone prompt
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

#[async_trait::async_trait]
impl PermissionProvider for AlwaysGranted {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

/// Fixed answer provider, used by tests and headless hosts
#[derive(Debug)]
pub struct StaticPermission {
    status: RwLock<PermissionStatus>,
    answer: PermissionStatus,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, PermissionStatus::Denied)
    }

    /// Starts undetermined; a request resolves to `answer`
    pub fn undetermined(answer: PermissionStatus) -> Self {
        Self::new(PermissionStatus::Undetermined, answer)
    }

    fn new(status: PermissionStatus, answer: PermissionStatus) -> Self {
        Self {
            status: RwLock::new(status),
            answer,
        }
    }
}

#[async_trait::async_trait]
impl PermissionProvider for StaticPermission {
    fn status(&self) -> PermissionStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn request(&self) -> PermissionStatus {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        if *status == PermissionStatus::Undetermined {
            info!("Microphone permission requested: {:?}", self.answer);
            *status = self.answer;
        }
        *status
    }
}
