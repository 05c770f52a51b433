#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlParseError(String),

    #[error("Request errored with status code {status}: {body}")]
    HttpError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Snowflake authentication error ({code}): {message}")]
    AuthError { code: String, message: String },

    #[error("Snowflake query error ({code}): {message}")]
    QueryError { code: String, message: String },

    #[error("Invalid connection parameters: {0}")]
    InvalidConnectionParameters(String),

    #[error("Unexpected response from Snowflake: {0}")]
    InvalidResponse(String),
}

pub type Result<T, E = WarehouseError> = std::result::Result<T, E>;
