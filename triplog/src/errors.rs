use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a [`BrowserDriver`](crate::driver::BrowserDriver).
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Option not found: {0}")]
    OptionNotFound(String),

    #[error("DevTools protocol error: {0}")]
    Protocol(String),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AutomationError::Timeout(_))
    }
}

#[derive(Error, Debug)]
pub enum TriplogError {
    #[error("spreadsheet not found: {}", .0.display())]
    MissingSpreadsheet(PathBuf),

    #[error("no credentials provided: identifier and secret must both be non-empty")]
    MissingCredentials,

    #[error("login appears to have failed: {0}")]
    Authentication(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("credential vault error: {0}")]
    Vault(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not read credentials from the terminal: {0}")]
    Prompt(String),

    #[error(transparent)]
    Browser(#[from] AutomationError),
}

pub type Result<T, E = TriplogError> = std::result::Result<T, E>;
