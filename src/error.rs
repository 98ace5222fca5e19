use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server returned status {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("elevation was declined or failed: {0}")]
    PermissionDenied(String),
    #[error("privileged command failed: {0}")]
    ProcessFailure(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("apply failed: {0}")]
    Apply(#[from] ApplyError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}
