pub mod email;
pub mod webhook;

use async_trait::async_trait;

use crate::models::TenderRecord;
use crate::utils::error::NotifyError;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

/// Announces records that were just persisted.
///
/// Delivery is best effort: the pipeline logs a failure and moves on to the
/// next notifier.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, source: &str, records: &[TenderRecord]) -> Result<(), NotifyError>;
}
