use crate::credentials::{CredentialProvider, Credentials, DEFAULT_PROFILE};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolves credentials through `aws configure export-credentials`.
pub struct AwsCliProvider {
    program: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessCredentials {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    expiration: Option<String>,
}

impl AwsCliProvider {
    pub fn new(program: Option<String>) -> Self {
        Self {
            program: program
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "aws".to_string()),
        }
    }

    fn parse_output(profile: &str, stdout: &[u8]) -> Result<Credentials, AppError> {
        let raw: ProcessCredentials = serde_json::from_slice(stdout).map_err(|e| {
            AppError::Provider(format!("unreadable credential output for '{profile}': {e}"))
        })?;

        let (Some(access_key_id), Some(secret_access_key)) = (
            raw.access_key_id.filter(|k| !k.is_empty()),
            raw.secret_access_key.filter(|k| !k.is_empty()),
        ) else {
            return Err(AppError::CredentialsNotFound(profile.to_string()));
        };

        let expiration = raw
            .expiration
            .as_deref()
            .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
            .map(|e| e.with_timezone(&Utc));

        Ok(Credentials::new(
            access_key_id,
            secret_access_key,
            raw.session_token,
            expiration,
        ))
    }
}

#[async_trait]
impl CredentialProvider for AwsCliProvider {
    fn name(&self) -> &'static str {
        "aws-cli"
    }

    async fn resolve(&self, profile: Option<&str>) -> Result<Credentials, AppError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["configure", "export-credentials", "--format", "process"]);
        if let Some(p) = profile {
            cmd.args(["--profile", p]);
        }
        let label = profile.unwrap_or(DEFAULT_PROFILE);

        debug!(program = %self.program, profile = %label, "invoking credential exporter");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::NotConfigured(format!(
                    "'{}' was not found; install the AWS CLI or set aws_cli_path",
                    self.program
                ))
            } else {
                AppError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AppError::Provider(if stderr.is_empty() {
                format!("credential export for '{label}' exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let credentials = Self::parse_output(label, &output.stdout)?;
        if credentials.is_expired() {
            warn!(profile = %label, "credential exporter returned already-expired credentials");
        }
        Ok(credentials)
    }

    fn list_profiles(&self) -> Result<Vec<String>, AppError> {
        list_profiles_from(&[config_file_path(), shared_credentials_path()])
    }
}

fn aws_home() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".aws"))
}

fn config_file_path() -> Option<PathBuf> {
    std::env::var_os("AWS_CONFIG_FILE")
        .map(PathBuf::from)
        .or_else(|| aws_home().map(|h| h.join("config")))
}

fn shared_credentials_path() -> Option<PathBuf> {
    std::env::var_os("AWS_SHARED_CREDENTIALS_FILE")
        .map(PathBuf::from)
        .or_else(|| aws_home().map(|h| h.join("credentials")))
}

pub(crate) fn list_profiles_from(paths: &[Option<PathBuf>]) -> Result<Vec<String>, AppError> {
    let mut profiles = BTreeSet::new();
    let mut any_file = false;

    for path in paths.iter().flatten() {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(AppError::Io(e)),
        };
        any_file = true;
        profiles.extend(raw.lines().filter_map(section_profile));
    }

    if any_file {
        profiles.insert(DEFAULT_PROFILE.to_string());
    }
    Ok(profiles.into_iter().collect())
}

/// Profile named by an ini section header, if the section is a profile.
fn section_profile(line: &str) -> Option<String> {
    let header = line.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
    if let Some(name) = header.strip_prefix("profile ") {
        let name = name.trim();
        return (!name.is_empty()).then(|| name.to_string());
    }
    // sso-session and services blocks are not profiles.
    if header.is_empty() || header.contains(' ') {
        return None;
    }
    Some(header.to_string())
}
