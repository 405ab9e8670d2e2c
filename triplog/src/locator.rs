use tracing::{debug, instrument};

use crate::driver::BrowserDriver;
use crate::errors::AutomationError;
use crate::selector::Selector;
use std::sync::Arc;
use std::time::Duration;

// Default timeout if none is specified on the locator itself
const DEFAULT_LOCATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// A selector bound to a page, with a default wait budget.
#[derive(Clone)]
pub struct Locator {
    driver: Arc<dyn BrowserDriver>,
    selector: Selector,
    timeout: Duration, // Default timeout for this locator instance
}

impl Locator {
    pub fn new(driver: Arc<dyn BrowserDriver>, selector: impl Into<Selector>) -> Self {
        Self {
            driver,
            selector: selector.into(),
            timeout: DEFAULT_LOCATOR_TIMEOUT,
        }
    }

    /// Locator matching whatever any of `selectors` matches.
    pub fn any<I>(driver: Arc<dyn BrowserDriver>, selectors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Selector>,
    {
        Self::new(driver, Selector::any(selectors))
    }

    pub async fn count(&self) -> Result<usize, AutomationError> {
        self.driver.count(&self.selector).await
    }

    /// Presence probe: never waits.
    pub async fn exists(&self) -> Result<bool, AutomationError> {
        Ok(self.count().await? > 0)
    }

    /// Wait for a match to appear, up to `timeout` or the locator's default.
    #[instrument(level = "debug", skip(self, timeout), fields(selector = %self.selector))]
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), AutomationError> {
        let effective_timeout = timeout.unwrap_or(self.timeout);
        debug!("Waiting up to {:?}", effective_timeout);

        if let Err(reason) = self.selector.validate() {
            return Err(AutomationError::InvalidSelector(reason));
        }

        self.driver
            .wait_for_selector(&self.selector, effective_timeout)
            .await
            .map_err(|e| match e {
                // Drivers that report a plain miss still mean "did not appear in time" here.
                AutomationError::ElementNotFound(inner_msg) => AutomationError::Timeout(format!(
                    "Timed out after {effective_timeout:?} waiting for {}. Original error: {inner_msg}",
                    self.selector
                )),
                e => e,
            })
    }

    /// Like [`wait`](Self::wait) but folds expiry into `Ok(false)`.
    pub async fn appears_within(&self, timeout: Duration) -> Result<bool, AutomationError> {
        match self.wait(Some(timeout)).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_timeout() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
