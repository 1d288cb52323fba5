//! User notification port.
//!
//! The chat pipeline tells users about significant degradations (e.g. the
//! output budget being cut by more than half). Delivery is an external
//! concern; a failed notification never affects the chat flow.

use std::future::Future;

use parley_types::error::NotifyError;

/// A short notice addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub title: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        user_id: &str,
        notice: &UserNotice,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}
