use crate::credentials::{CredentialProvider, Credentials, DEFAULT_PROFILE};
use crate::error::AppError;
use async_trait::async_trait;

/// Reads the standard `AWS_*` environment variables. Profiles are ignored.
pub struct EnvironmentProvider;

impl EnvironmentProvider {
    fn from_lookup<F>(lookup: F) -> Option<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
        let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
        Some(Credentials::new(
            access_key_id,
            secret_access_key,
            lookup("AWS_SESSION_TOKEN"),
            None,
        ))
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn resolve(&self, profile: Option<&str>) -> Result<Credentials, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok()).ok_or_else(|| {
            AppError::CredentialsNotFound(profile.unwrap_or(DEFAULT_PROFILE).to_string())
        })
    }
}
