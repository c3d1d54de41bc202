//! Error types for template rendering

use thiserror::Error;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template syntax: {message}")]
    SyntaxError { message: String },

    #[error("undefined variable: {message}")]
    UndefinedVariable { message: String },

    #[error("failed to render template: {message}")]
    RenderError { message: String },
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => TemplateError::SyntaxError { message },
            minijinja::ErrorKind::UndefinedError => TemplateError::UndefinedVariable { message },
            _ => TemplateError::RenderError { message },
        }
    }
}
