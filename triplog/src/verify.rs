//! Confirms that a submitted row was accepted.
//!
//! Success is any one of several on-page signals. When none appears in the
//! budget, the verifier presses a recovery key to dismiss whatever modal may
//! be blocking the page and keeps a full-page screenshot for later review.
//! Rows are never resubmitted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::driver::BrowserDriver;
use crate::errors::AutomationError;
use crate::locator::Locator;
use crate::selector::Selector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyProfile {
    pub success_signals: Vec<String>,
    /// Overall budget shared by all signals
    pub budget_ms: u64,
    pub recovery_key: String,
    pub snapshot_dir: PathBuf,
}

impl Default for VerifyProfile {
    fn default() -> Self {
        Self {
            success_signals: vec![
                ".toast.success".into(),
                ".alert-success".into(),
                "text=등록되었습니다".into(),
                "text=정상적으로 처리".into(),
            ],
            budget_ms: 15_000,
            recovery_key: "Enter".into(),
            snapshot_dir: PathBuf::from("."),
        }
    }
}

impl VerifyProfile {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn snapshot_path(&self, row: u32) -> PathBuf {
        self.snapshot_dir.join(format!("row_{row}_error.png"))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.success_signals.is_empty() {
            return Err("at least one success signal is required".into());
        }
        for s in &self.success_signals {
            Selector::from(s.as_str())
                .validate()
                .map_err(|reason| format!("success signal `{s}`: {reason}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No success signal within the budget
    VerificationTimeout,
    /// The driver failed while the row was being written or submitted
    Transcription(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::VerificationTimeout => write!(f, "no success signal appeared"),
            FailureReason::Transcription(msg) => write!(f, "could not fill the form: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Success {
        row: u32,
    },
    Failed {
        row: u32,
        reason: FailureReason,
        snapshot: Option<PathBuf>,
    },
}

impl SubmissionOutcome {
    pub fn row(&self) -> u32 {
        match self {
            SubmissionOutcome::Success { row } | SubmissionOutcome::Failed { row, .. } => *row,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success { .. })
    }
}

pub struct Verifier {
    driver: Arc<dyn BrowserDriver>,
    profile: VerifyProfile,
}

impl Verifier {
    pub fn new(driver: Arc<dyn BrowserDriver>, profile: VerifyProfile) -> Self {
        Self { driver, profile }
    }

    /// Wait for any success signal; on expiry record a diagnostic and report failure.
    #[instrument(skip(self))]
    pub async fn verify(&self, row: u32) -> Result<SubmissionOutcome, AutomationError> {
        let signals = Locator::any(self.driver.clone(), &self.profile.success_signals);
        if signals.appears_within(self.profile.budget()).await? {
            info!(row, "Row accepted");
            return Ok(SubmissionOutcome::Success { row });
        }

        if let Err(e) = self.driver.press_key(&self.profile.recovery_key).await {
            debug!("Recovery key press failed: {e}");
        }
        let snapshot = self.snapshot(row).await;
        warn!(
            row,
            snapshot = ?snapshot,
            "No success signal within {:?}",
            self.profile.budget()
        );
        Ok(SubmissionOutcome::Failed {
            row,
            reason: FailureReason::VerificationTimeout,
            snapshot,
        })
    }

    /// Full-page screenshot at `row_<row>_error.png`. A failed capture is logged, not raised.
    pub async fn snapshot(&self, row: u32) -> Option<PathBuf> {
        let path = self.profile.snapshot_path(row);
        match self.capture(&path).await {
            Ok(()) => Some(path),
            Err(e) => {
                error!(row, "Could not save {}: {e}", path.display());
                None
            }
        }
    }

    async fn capture(&self, path: &Path) -> Result<(), AutomationError> {
        self.driver.screenshot(path, true).await
    }
}
