//! Trip-log transcription through a real browser
//!
//! Reads vehicle trip records from a spreadsheet, normalizes them into the
//! intranet's canonical vocabulary, and submits each one through the trip-log
//! web form, logging in first when the session has lapsed. Rows whose
//! submission cannot be confirmed keep a screenshot for manual follow-up.

pub mod auth;
pub mod browser;
pub mod cdp;
pub mod config;
pub mod driver;
pub mod errors;
pub mod interact;
pub mod locator;
pub mod normalize;
pub mod record;
pub mod runner;
pub mod selector;
pub mod sheet;
pub mod transcribe;
pub mod vault;
pub mod verify;

pub use auth::{
    reset_credentials, AuthState, Authenticator, Credential, CredentialPrompt,
    CredentialResolver, LoginProfile,
};
pub use browser::{ChromeSession, LaunchOptions, PageOptions};
pub use config::Config;
pub use driver::BrowserDriver;
pub use errors::{AutomationError, Result, TriplogError};
pub use locator::Locator;
pub use normalize::Normalizer;
pub use record::{CellValue, ColumnLayout, NormalizedRecord, Record};
pub use runner::{RunAborted, RunReport, Runner};
pub use selector::Selector;
pub use sheet::{MemorySheet, SheetSource, WorkbookSheet};
pub use transcribe::{FormMap, Transcriber};
pub use vault::{CredentialVault, KeyringVault, MemoryVault};
pub use verify::{FailureReason, SubmissionOutcome, Verifier, VerifyProfile};
