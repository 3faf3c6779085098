use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("no AWS credentials found for profile '{0}'")]
    CredentialsNotFound(String),

    #[error("credential provider failed: {0}")]
    Provider(String),

    #[error("AWS API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid response from AWS: {0}")]
    InvalidResponse(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}
