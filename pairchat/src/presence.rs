//! Presence protocol.
//!
//! A user is online while `status/{user}` is `true`. Entering a chat sets
//! the key and registers a store-side hook that writes `false` if the
//! connection drops; leaving cleanly writes `false` directly. The other
//! participant's key is watched through a subscription. There is no
//! heartbeat and no staleness timeout.

use pairchat_proto::path::Path;
use pairchat_proto::presence::PresenceStatus;

use crate::backend::{Backend, BackendError, Subscription};

/// Publishes the local user as online and arms the offline hook.
///
/// Failures are logged and dropped.
pub async fn go_online<B: Backend>(backend: &B) {
    if let Err(e) = try_go_online(backend).await {
        tracing::warn!(user = backend.user(), error = %e, "failed to publish presence");
    }
}

async fn try_go_online<B: Backend>(backend: &B) -> Result<(), BackendError> {
    let path = status_path(backend.user())?;
    backend
        .on_disconnect_set(&path, PresenceStatus::Offline.to_value())
        .await?;
    backend.set(&path, PresenceStatus::Online.to_value()).await
}

/// Publishes the local user as offline.
///
/// Failures are logged and dropped; the disconnect hook still covers a
/// dropped connection.
pub async fn go_offline<B: Backend>(backend: &B) {
    let result = match status_path(backend.user()) {
        Ok(path) => backend.set(&path, PresenceStatus::Offline.to_value()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::warn!(user = backend.user(), error = %e, "failed to publish offline presence");
    }
}

/// Live presence of another user.
pub struct PresenceWatch {
    subscription: Subscription,
}

impl PresenceWatch {
    /// Subscribes to `status/{user}`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the subscription cannot be started.
    pub async fn start<B: Backend>(backend: &B, user: &str) -> Result<Self, BackendError> {
        let subscription = backend.subscribe(&status_path(user)?).await?;
        Ok(Self { subscription })
    }

    /// Waits for the next reported status. Absent or non-boolean values
    /// read as offline.
    pub async fn next(&mut self) -> Option<PresenceStatus> {
        self.subscription
            .next()
            .await
            .map(|value| PresenceStatus::from_value(&value))
    }
}

fn status_path(user: &str) -> Result<Path, BackendError> {
    Path::status(user).map_err(|e| BackendError::Rejected(e.to_string()))
}
