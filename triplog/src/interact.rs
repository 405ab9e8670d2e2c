//! Interactions against markup this tool does not control.
//!
//! Each one probes the page first and then takes one of two paths.

use tracing::debug;

use crate::driver::BrowserDriver;
use crate::errors::AutomationError;
use crate::selector::Selector;

/// Submits the first form on the page when no submit control exists.
pub const FORM_SUBMIT_SCRIPT: &str =
    "(() => { const f = document.querySelector('form'); f && f.submit(); })()";

/// How a value gets into a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEntry {
    /// The field is a `<select>`: pick the matching option
    Choose,
    /// Anything else: type the value
    Type,
}

impl FieldEntry {
    pub async fn probe(
        driver: &dyn BrowserDriver,
        selector: &Selector,
    ) -> Result<FieldEntry, AutomationError> {
        Ok(match driver.tag_name(selector).await?.as_deref() {
            Some("select") => FieldEntry::Choose,
            _ => FieldEntry::Type,
        })
    }

    pub async fn apply(
        self,
        driver: &dyn BrowserDriver,
        selector: &Selector,
        value: &str,
    ) -> Result<(), AutomationError> {
        match self {
            FieldEntry::Choose => driver.select_option(selector, value).await,
            FieldEntry::Type => driver.fill(selector, value).await,
        }
    }
}

/// Probe `selector` and write `value` the way its control expects.
pub async fn enter_value(
    driver: &dyn BrowserDriver,
    selector: &Selector,
    value: &str,
) -> Result<FieldEntry, AutomationError> {
    let entry = FieldEntry::probe(driver, selector).await?;
    debug!(%selector, ?entry, "Entering value");
    entry.apply(driver, selector, value).await?;
    Ok(entry)
}

/// How a form gets submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitAction {
    /// Click the first present submit control
    Click(Selector),
    /// No control found: call `form.submit()` directly
    FormSubmit,
}

impl SubmitAction {
    /// First candidate present on the page wins; order expresses preference.
    pub async fn resolve(
        driver: &dyn BrowserDriver,
        candidates: &[Selector],
    ) -> Result<SubmitAction, AutomationError> {
        for candidate in candidates {
            if driver.count(candidate).await? > 0 {
                return Ok(SubmitAction::Click(candidate.clone()));
            }
        }
        Ok(SubmitAction::FormSubmit)
    }

    pub async fn perform(&self, driver: &dyn BrowserDriver) -> Result<(), AutomationError> {
        debug!(action = ?self, "Submitting form");
        match self {
            SubmitAction::Click(selector) => driver.click(selector).await,
            SubmitAction::FormSubmit => driver.evaluate(FORM_SUBMIT_SCRIPT).await.map(|_| ()),
        }
    }
}
