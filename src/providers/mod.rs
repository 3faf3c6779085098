use crate::error::AppError;
use crate::models::{Account, BillingSnapshot};
use async_trait::async_trait;

pub mod cost_explorer;

/// Produces one account's billing snapshot.
#[async_trait]
pub trait BillingFetcher: Send + Sync {
    async fn fetch_billing(&self, account: &Account) -> Result<BillingSnapshot, AppError>;

    /// Drops any cached credentials so the next fetch resolves them again.
    fn forget_credentials(&self) {}
}
