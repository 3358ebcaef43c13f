use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tauri error: {0}")]
    Tauri(#[from] tauri::Error),

    #[error("Audio decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("Audio encode error: {0}")]
    Encode(#[from] hound::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("No audio loaded")]
    NoAudioLoaded,

    #[error("Invalid media: {0}")]
    Media(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("{message}")]
    Separation { error_type: String, message: String },

    #[error("Dialog error: {0}")]
    Dialog(String),
}

impl From<AppError> for tauri::ipc::InvokeError {
    fn from(error: AppError) -> Self {
        tauri::ipc::InvokeError::from(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
