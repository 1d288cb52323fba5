//! Notifier that records user notices in the structured log.
//!
//! Parley has no push channel of its own; deployments that do can implement
//! `Notifier` against it. Until then a notice is an `info` event carrying the
//! user id, which log shippers can route.

use tracing::info;

use parley_core::notify::{Notifier, UserNotice};
use parley_types::error::NotifyError;

#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: &str, notice: &UserNotice) -> Result<(), NotifyError> {
        info!(user_id, title = %notice.title, body = %notice.body, "User notice");
        Ok(())
    }
}
