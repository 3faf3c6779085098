use crate::config::{AppConfig, CredentialSource};
use crate::credentials::cli::AwsCliProvider;
use crate::credentials::environment::EnvironmentProvider;
use crate::credentials::{CredentialCache, CredentialProvider};
use crate::error::AppError;
use crate::models::{Account, AggregatedBilling, BillingSnapshot, RefreshInterval};
use crate::providers::cost_explorer::CostExplorerClient;
use crate::providers::BillingFetcher;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub fn credential_provider(cfg: &AppConfig) -> Arc<dyn CredentialProvider> {
    match cfg.credential_source {
        CredentialSource::Cli => Arc::new(AwsCliProvider::new(cfg.aws_cli_path.clone())),
        CredentialSource::Environment => Arc::new(EnvironmentProvider),
    }
}

/// Shared refresh state. Each account writes only its own keyed entries.
#[derive(Debug, Default)]
struct BillingState {
    accounts: Vec<Account>,
    snapshots: HashMap<String, BillingSnapshot>,
    errors: HashMap<String, String>,
    is_refreshing: bool,
    last_refresh: Option<DateTime<Utc>>,
}

impl BillingState {
    fn forget_missing_accounts(&mut self) {
        let ids: Vec<&String> = self.accounts.iter().map(|a| &a.id).collect();
        self.snapshots.retain(|id, _| ids.contains(&id));
        self.errors.retain(|id, _| ids.contains(&id));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh was already running; nothing was fetched.
    Skipped,
    Completed {
        succeeded: Vec<String>,
        failed: Vec<(String, String)>,
    },
}

struct Inner {
    fetcher: Arc<dyn BillingFetcher>,
    state: Mutex<BillingState>,
    notify: watch::Sender<u64>,
}

/// Fans billing fetches out across enabled accounts and keeps the latest
/// snapshot and error per account.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<Inner>,
}

impl RefreshOrchestrator {
    pub fn new(fetcher: Arc<dyn BillingFetcher>, accounts: Vec<Account>) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                fetcher,
                state: Mutex::new(BillingState {
                    accounts,
                    ..Default::default()
                }),
                notify,
            }),
        }
    }

    pub fn from_config(cfg: &AppConfig, accounts: Vec<Account>) -> Result<Self, AppError> {
        let cache = Arc::new(CredentialCache::new(credential_provider(cfg)));
        let client = CostExplorerClient::new(cache, cfg.endpoint_url.clone())?;
        Ok(Self::new(Arc::new(client), accounts))
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.notify.subscribe()
    }

    fn notify_change(&self) {
        self.inner.notify.send_modify(|v| *v = v.wrapping_add(1));
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Runs one fetch wave over the enabled accounts.
    ///
    /// Returns `Skipped` without touching the network when a wave is
    /// already in flight. The wave runs on its own task, so dropping the
    /// returned future does not cancel it.
    pub async fn refresh(&self) -> RefreshOutcome {
        let accounts = {
            let mut state = self.inner.state.lock().await;
            if state.is_refreshing {
                debug!("refresh already in progress, skipping");
                return RefreshOutcome::Skipped;
            }
            state.is_refreshing = true;
            state
                .accounts
                .iter()
                .filter(|a| a.is_enabled)
                .cloned()
                .collect::<Vec<_>>()
        };

        let this = self.clone();
        let wave = tokio::spawn(async move { this.run_wave(accounts).await });
        match wave.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "refresh task aborted");
                let mut state = self.inner.state.lock().await;
                state.is_refreshing = false;
                state.last_refresh = Some(Utc::now());
                drop(state);
                self.notify_change();
                RefreshOutcome::Completed {
                    succeeded: vec![],
                    failed: vec![],
                }
            }
        }
    }

    async fn run_wave(&self, accounts: Vec<Account>) -> RefreshOutcome {
        info!(accounts = accounts.len(), "refresh started");

        let tasks: Vec<(String, JoinHandle<Result<BillingSnapshot, AppError>>)> = accounts
            .into_iter()
            .map(|account| {
                let fetcher = self.inner.fetcher.clone();
                let id = account.id.clone();
                (
                    id,
                    tokio::spawn(async move { fetcher.fetch_billing(&account).await }),
                )
            })
            .collect();

        let (ids, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let results: Vec<(String, Result<BillingSnapshot, String>)> = ids
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(id, joined)| {
                let result = match joined {
                    Ok(fetched) => fetched.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("fetch task failed: {e}")),
                };
                (id, result)
            })
            .collect();

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            for (id, result) in results {
                match result {
                    Ok(snapshot) => {
                        state.snapshots.insert(id.clone(), snapshot);
                        state.errors.remove(&id);
                        succeeded.push(id);
                    }
                    Err(message) => {
                        warn!(account = %id, error = %message, "billing fetch failed");
                        state.errors.insert(id.clone(), message.clone());
                        failed.push((id, message));
                    }
                }
            }
            // Accounts removed mid-wave must not reappear.
            state.forget_missing_accounts();
            state.is_refreshing = false;
            state.last_refresh = Some(Utc::now());
        }
        self.notify_change();

        info!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            "refresh finished"
        );
        RefreshOutcome::Completed { succeeded, failed }
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    pub async fn accounts(&self) -> Vec<Account> {
        self.inner.state.lock().await.accounts.clone()
    }

    /// Drops cached credentials held by the fetcher.
    pub fn forget_credentials(&self) {
        self.inner.fetcher.forget_credentials();
    }

    pub async fn add_account(&self, account: Account) {
        self.inner.state.lock().await.accounts.push(account);
        self.notify_change();
    }

    /// Replaces the account with the same id. Returns false if none exists.
    pub async fn update_account(&self, account: Account) -> bool {
        let updated = {
            let mut state = self.inner.state.lock().await;
            match state.accounts.iter_mut().find(|a| a.id == account.id) {
                Some(existing) => {
                    *existing = account;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.notify_change();
        }
        updated
    }

    pub async fn remove_account(&self, id: &str) -> Option<Account> {
        let removed = {
            let mut state = self.inner.state.lock().await;
            let idx = state.accounts.iter().position(|a| a.id == id)?;
            let removed = state.accounts.remove(idx);
            state.forget_missing_accounts();
            removed
        };
        self.notify_change();
        Some(removed)
    }

    /// Installs previously persisted snapshots for known accounts.
    pub async fn seed_snapshots(&self, snapshots: Vec<BillingSnapshot>) {
        {
            let mut state = self.inner.state.lock().await;
            for snap in snapshots {
                if state.accounts.iter().any(|a| a.id == snap.account_id) {
                    state.snapshots.insert(snap.account_id.clone(), snap);
                }
            }
        }
        self.notify_change();
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn snapshot(&self, account_id: &str) -> Option<BillingSnapshot> {
        self.inner.state.lock().await.snapshots.get(account_id).cloned()
    }

    /// Snapshots of enabled accounts, in account order.
    pub async fn snapshots(&self) -> Vec<BillingSnapshot> {
        let state = self.inner.state.lock().await;
        state
            .accounts
            .iter()
            .filter(|a| a.is_enabled)
            .filter_map(|a| state.snapshots.get(&a.id).cloned())
            .collect()
    }

    pub async fn errors(&self) -> HashMap<String, String> {
        self.inner.state.lock().await.errors.clone()
    }

    pub async fn is_refreshing(&self) -> bool {
        self.inner.state.lock().await.is_refreshing
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().await.last_refresh
    }

    pub async fn aggregate(&self) -> AggregatedBilling {
        AggregatedBilling::from_snapshots(&self.snapshots().await)
    }
}

/// Periodic driver calling [`RefreshOrchestrator::refresh`] on an interval.
pub struct RefreshScheduler {
    orchestrator: RefreshOrchestrator,
    interval: std::sync::Mutex<RefreshInterval>,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(orchestrator: RefreshOrchestrator) -> Self {
        Self {
            orchestrator,
            interval: std::sync::Mutex::new(RefreshInterval::Manual),
            driver: std::sync::Mutex::new(None),
        }
    }

    pub fn interval(&self) -> RefreshInterval {
        *self
            .interval
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restarts the driver with `interval`; `Manual` leaves it stopped.
    /// An in-flight refresh is never cancelled.
    pub fn set_interval(&self, interval: RefreshInterval) {
        self.stop();
        *self
            .interval
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = interval;

        let Some(period) = interval.as_duration() else {
            debug!("manual refresh, scheduler idle");
            return;
        };

        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                orchestrator.refresh().await;
            }
        });
        info!(interval = interval.as_label(), "refresh scheduler started");
        *self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    pub fn stop(&self) {
        let previous = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = previous {
            handle.abort();
            debug!("refresh scheduler stopped");
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
