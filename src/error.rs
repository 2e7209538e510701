use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Authentication failures are shown to the user as-is; everything else gets a generic message.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Please log in first".to_string(),
            AppError::Backend(BackendError::InvalidCredentials) => {
                "Invalid login credentials".to_string()
            }
            AppError::Backend(BackendError::Api { status, message })
                if matches!(*status, 400 | 401 | 422) =>
            {
                message.clone()
            }
            AppError::BadRequest(msg) => msg.clone(),
            AppError::NotFound => "Not found".to_string(),
            AppError::Image(_) => "Could not read that image".to_string(),
            _ => "Something went wrong, please try again".to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
