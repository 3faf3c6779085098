use crate::error::AppError;
use crate::models::{Account, RefreshInterval};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "aws-cost-meter";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("AWS_COST_METER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "costmeter", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".aws-cost-meter"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    #[default]
    Cli,
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub refresh_interval: RefreshInterval,
    pub credential_source: CredentialSource,
    pub aws_cli_path: Option<String>,
    pub endpoint_url: Option<String>,
    pub default_region: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_interval: RefreshInterval::default(),
            credential_source: CredentialSource::default(),
            aws_cli_path: None,
            endpoint_url: None,
            default_region: "us-east-1".into(),
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn accounts_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("accounts.json"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("snapshots.sqlite"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(&path)?;
    Ok(toml::from_str(&raw)?)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(config_path()?, raw)?;
    Ok(())
}

/// Trims names and regions, drops accounts whose id repeats an earlier one.
/// Returns whether anything changed.
fn normalize_accounts(accounts: &mut Vec<Account>) -> bool {
    let mut changed = false;
    let mut seen = HashSet::new();
    accounts.retain(|a| {
        let fresh = seen.insert(a.id.clone());
        changed |= !fresh;
        fresh
    });

    for account in accounts.iter_mut() {
        let name = account.name.trim().to_string();
        let region = account.region.trim().to_ascii_lowercase();
        let profile = account
            .profile_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        if name != account.name || region != account.region || profile != account.profile_name {
            changed = true;
        }
        account.name = name;
        account.region = region;
        account.profile_name = profile;
    }
    changed
}

pub fn load_accounts_from(path: &Path) -> Result<Vec<Account>, AppError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let raw = fs::read_to_string(path)?;
    let mut accounts: Vec<Account> = serde_json::from_str(&raw)?;
    if normalize_accounts(&mut accounts) {
        save_accounts_to(path, &accounts)?;
    }
    Ok(accounts)
}

pub fn save_accounts_to(path: &Path, accounts: &[Account]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(accounts)?)?;
    Ok(())
}

pub fn load_accounts() -> Result<Vec<Account>, AppError> {
    load_accounts_from(&accounts_path()?)
}

pub fn save_accounts(accounts: &[Account]) -> Result<(), AppError> {
    save_accounts_to(&accounts_path()?, accounts)
}

/// Finds an account by id or by case-insensitive display name.
pub fn find_account<'a>(accounts: &'a mut [Account], key: &str) -> Option<&'a mut Account> {
    let key = key.trim();
    let idx = accounts
        .iter()
        .position(|a| a.id == key)
        .or_else(|| accounts.iter().position(|a| a.name.eq_ignore_ascii_case(key)))?;
    accounts.get_mut(idx)
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
