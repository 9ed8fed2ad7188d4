use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid model source '{0}': expected one of `hf` or `pytorch`")]
    InvalidSource(String),

    #[error("Configuration error: {field} - {message}")]
    Config { field: String, message: String },

    #[error("Column '{column}' not found in {path}")]
    MissingColumn { column: String, path: String },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HuggingFace hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),
}

impl PipelineError {
    pub fn config(field: &str, message: impl Into<String>) -> Self {
        PipelineError::Config {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_default();
        PipelineError::Config {
            field,
            message: errors.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
