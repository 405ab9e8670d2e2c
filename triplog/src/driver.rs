use std::path::Path;
use std::time::Duration;

use crate::errors::AutomationError;
use crate::selector::Selector;

/// The capability set the automation engine needs from a live browser page.
///
/// Every call is awaited to completion before the next one starts; the engine
/// never drives a page from two places at once.
#[async_trait::async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate and wait until the DOM is ready
    async fn navigate(&self, url: &str) -> Result<(), AutomationError>;

    async fn current_url(&self) -> Result<String, AutomationError>;

    /// Full serialized HTML of the current document
    async fn content(&self) -> Result<String, AutomationError>;

    /// Number of elements currently matching, without waiting
    async fn count(&self, selector: &Selector) -> Result<usize, AutomationError>;

    /// Lower-cased tag name of the first match, if any
    async fn tag_name(&self, selector: &Selector) -> Result<Option<String>, AutomationError>;

    /// Replace the value of the first match and fire `input`/`change`
    async fn fill(&self, selector: &Selector, value: &str) -> Result<(), AutomationError>;

    async fn click(&self, selector: &Selector) -> Result<(), AutomationError>;

    /// Select the option whose value (or, failing that, label) equals `value`
    async fn select_option(&self, selector: &Selector, value: &str)
        -> Result<(), AutomationError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, AutomationError>;

    /// Wait until a visible element matches. Expiry yields [`AutomationError::Timeout`].
    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), AutomationError>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), AutomationError>;

    /// Press and release a named key (`Enter`, `Escape`, `Tab`)
    async fn press_key(&self, key: &str) -> Result<(), AutomationError>;

    /// Plain pause on the page's clock
    async fn wait_for_timeout(&self, duration: Duration);
}
