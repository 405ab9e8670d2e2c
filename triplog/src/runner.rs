use tracing::{error, info, instrument, warn};

use crate::auth::Authenticator;
use crate::errors::{AutomationError, Result, TriplogError};
use crate::normalize::Normalizer;
use crate::record::{ColumnLayout, Record};
use crate::sheet::SheetSource;
use crate::transcribe::Transcriber;
use crate::verify::{FailureReason, SubmissionOutcome, Verifier};

/// First data row of the operator's template.
pub const DEFAULT_START_ROW: u32 = 9;

/// Outcomes of one run, in row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    outcomes: Vec<SubmissionOutcome>,
}

impl RunReport {
    pub fn push(&mut self, outcome: SubmissionOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[SubmissionOutcome] {
        &self.outcomes
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.processed() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubmissionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// A run that stopped early, with the outcomes of the rows it got through.
#[derive(Debug, thiserror::Error)]
#[error("run stopped at row {row}")]
pub struct RunAborted {
    pub row: u32,
    pub partial: RunReport,
    pub source: TriplogError,
}

/// Drives rows from the sheet through normalize, transcribe and verify.
pub struct Runner {
    authenticator: Authenticator,
    normalizer: Normalizer,
    transcriber: Transcriber,
    verifier: Verifier,
    layout: ColumnLayout,
    start_row: u32,
}

impl Runner {
    pub fn new(
        authenticator: Authenticator,
        normalizer: Normalizer,
        transcriber: Transcriber,
        verifier: Verifier,
        layout: ColumnLayout,
    ) -> Self {
        Self {
            authenticator,
            normalizer,
            transcriber,
            verifier,
            layout,
            start_row: DEFAULT_START_ROW,
        }
    }

    pub fn with_start_row(mut self, row: u32) -> Self {
        self.start_row = row.max(1);
        self
    }

    /// Process rows from the start row until the sentinel column is blank.
    ///
    /// Expects the page to already show the target form (or a login page in
    /// front of it). Per-row driver failures are recorded in the report;
    /// authentication, credential and spreadsheet errors end the run.
    #[instrument(skip(self, sheet), fields(start_row = self.start_row))]
    pub async fn run(
        &mut self,
        sheet: &dyn SheetSource,
    ) -> std::result::Result<RunReport, RunAborted> {
        let mut report = RunReport::default();
        let mut row = self.start_row;

        match self.authenticator.ensure_session().await {
            Ok(state) => info!(?state, "Session ready"),
            Err(source) => return Err(abort(report, row, source)),
        }

        loop {
            let record = match Record::read(sheet, row, &self.layout) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    info!(row, "Sentinel cell is empty; all rows processed");
                    break;
                }
                Err(source) => return Err(abort(report, row, source)),
            };

            let outcome = match self.renew_session(row).await {
                Ok(()) => self.process(&record).await,
                Err(TriplogError::Browser(e)) => self.driver_failure(row, e).await,
                Err(source) => return Err(abort(report, row, source)),
            };
            match &outcome {
                SubmissionOutcome::Success { .. } => info!(row, "Row submitted"),
                SubmissionOutcome::Failed { reason, .. } => warn!(row, %reason, "Row failed"),
            }
            report.push(outcome);
            row += 1;
        }

        info!(
            processed = report.processed(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Run complete"
        );
        Ok(report)
    }

    /// Log in again if the last submission landed outside the session.
    async fn renew_session(&mut self, row: u32) -> Result<()> {
        if self.authenticator.check_session().await? {
            warn!(row, "Session expired; logging in again");
            self.authenticator.ensure_session().await?;
        }
        Ok(())
    }

    async fn process(&self, record: &Record) -> SubmissionOutcome {
        let normalized = self.normalizer.normalize(record);
        let submitted = self.transcriber.transcribe(&normalized).await;
        let verified = match submitted {
            Ok(_) => self.verifier.verify(record.row).await,
            Err(e) => Err(e),
        };
        match verified {
            Ok(outcome) => outcome,
            Err(e) => self.driver_failure(record.row, e).await,
        }
    }

    async fn driver_failure(&self, row: u32, error: AutomationError) -> SubmissionOutcome {
        warn!(row, "Browser error while handling row: {error}");
        let snapshot = self.verifier.snapshot(row).await;
        SubmissionOutcome::Failed {
            row,
            reason: FailureReason::Transcription(error.to_string()),
            snapshot,
        }
    }
}

fn abort(partial: RunReport, row: u32, source: TriplogError) -> RunAborted {
    error!(row, processed = partial.processed(), "Run stopped: {source}");
    RunAborted {
        row,
        partial,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn report_counts() {
        let mut report = RunReport::default();
        report.push(SubmissionOutcome::Success { row: 9 });
        report.push(SubmissionOutcome::Failed {
            row: 10,
            reason: FailureReason::VerificationTimeout,
            snapshot: Some(PathBuf::from("row_10_error.png")),
        });
        report.push(SubmissionOutcome::Success { row: 11 });

        assert_eq!(report.processed(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.failures().map(SubmissionOutcome::row).collect::<Vec<_>>(),
            vec![10]
        );
    }
}
