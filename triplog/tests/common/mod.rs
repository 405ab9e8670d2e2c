#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use triplog::driver::BrowserDriver;
use triplog::errors::AutomationError;
use triplog::selector::Selector;

pub const TARGET_URL: &str = "http://intra.test/car_drive_add.asp";
pub const LOGIN_URL: &str = "http://intra.test/member/login.asp";

/// Everything the fake page was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String),
    Fill(String, String),
    Select(String, String),
    Click(String),
    Evaluate(String),
    PressKey(String),
    Screenshot(PathBuf),
    Pause(Duration),
}

/// Applied to the page on the next form submission.
#[derive(Debug, Clone, Default)]
pub struct PageChange {
    pub url: Option<String>,
    pub show: Vec<String>,
    pub hide: Vec<String>,
    pub content: Option<String>,
    /// Reads of the URL that fail afterwards, as while a redirect is in flight
    pub url_errors: usize,
}

impl PageChange {
    pub fn show(selectors: &[&str]) -> Self {
        Self {
            show: selectors.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn hide(mut self, selectors: &[&str]) -> Self {
        self.hide = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn goto(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn unsettled(mut self, url_errors: usize) -> Self {
        self.url_errors = url_errors;
        self
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    content: String,
    /// Present CSS selectors and their tag names
    elements: HashMap<String, String>,
    calls: Vec<Call>,
    on_submit: VecDeque<PageChange>,
    broken: HashSet<String>,
    url_errors: usize,
    fail_keys: bool,
    fail_screenshots: bool,
}

/// In-memory page: CSS selectors match by exact text of one comma-separated
/// part; `text=` selectors match the page content.
#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

impl FakePage {
    pub fn at(url: &str) -> Self {
        let page = Self::default();
        page.state.lock().unwrap().url = url.to_string();
        page
    }

    pub fn with_element(self, css: &str, tag: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .elements
            .insert(css.to_string(), tag.to_string());
        self
    }

    pub fn with_content(self, content: &str) -> Self {
        self.state.lock().unwrap().content = content.to_string();
        self
    }

    pub fn on_submit(self, change: PageChange) -> Self {
        self.state.lock().unwrap().on_submit.push_back(change);
        self
    }

    /// fill/click on this selector fails as if the element never attached
    pub fn with_broken(self, css: &str) -> Self {
        self.state.lock().unwrap().broken.insert(css.to_string());
        self
    }

    pub fn failing_keys(self) -> Self {
        self.state.lock().unwrap().fail_keys = true;
        self
    }

    pub fn failing_screenshots(self) -> Self {
        self.state.lock().unwrap().fail_screenshots = true;
        self
    }

    pub fn driver(&self) -> Arc<dyn BrowserDriver> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn filled(&self, selector: &str) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Fill(s, v) | Call::Select(s, v) if s == selector => Some(v),
            _ => None,
        })
    }

    pub fn touched(&self, selector: &str) -> bool {
        self.calls().iter().any(|call| match call {
            Call::Fill(s, _) | Call::Select(s, _) => s == selector,
            _ => false,
        })
    }

    pub fn submissions(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| match call {
                Call::Click(_) => true,
                Call::Evaluate(script) => script.contains("submit()"),
                _ => false,
            })
            .count()
    }
}

impl PageState {
    fn matches(&self, selector: &Selector) -> usize {
        match selector {
            Selector::Css(css) => css
                .split(',')
                .filter(|part| self.elements.contains_key(part.trim()))
                .count(),
            Selector::Text(fragment) => usize::from(self.content.contains(fragment.as_str())),
            Selector::Or(parts) => parts.iter().map(|p| self.matches(p)).sum(),
            Selector::Invalid(_) => 0,
        }
    }

    fn tag_of(&self, selector: &Selector) -> Option<String> {
        match selector {
            Selector::Css(css) => css
                .split(',')
                .find_map(|part| self.elements.get(part.trim()).cloned()),
            Selector::Or(parts) => parts.iter().find_map(|p| self.tag_of(p)),
            _ => None,
        }
    }

    fn check_broken(&self, selector: &Selector) -> Result<(), AutomationError> {
        if self.broken.contains(&selector.to_string()) {
            return Err(AutomationError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    fn submitted(&mut self) {
        if let Some(change) = self.on_submit.pop_front() {
            if let Some(url) = change.url {
                self.url = url;
            }
            if let Some(content) = change.content {
                self.content = content;
            }
            self.url_errors = change.url_errors;
            for css in change.hide {
                self.elements.remove(&css);
            }
            for css in change.show {
                self.elements.insert(css, "div".to_string());
            }
        }
    }
}

#[async_trait::async_trait]
impl BrowserDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Navigate(url.to_string()));
        state.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        let mut state = self.state.lock().unwrap();
        if state.url_errors > 0 {
            state.url_errors -= 1;
            return Err(AutomationError::Protocol(
                "Runtime.evaluate: Execution context was destroyed. (-32000)".into(),
            ));
        }
        Ok(state.url.clone())
    }

    async fn content(&self) -> Result<String, AutomationError> {
        Ok(self.state.lock().unwrap().content.clone())
    }

    async fn count(&self, selector: &Selector) -> Result<usize, AutomationError> {
        Ok(self.state.lock().unwrap().matches(selector))
    }

    async fn tag_name(&self, selector: &Selector) -> Result<Option<String>, AutomationError> {
        Ok(self.state.lock().unwrap().tag_of(selector))
    }

    async fn fill(&self, selector: &Selector, value: &str) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.check_broken(selector)?;
        state
            .calls
            .push(Call::Fill(selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.check_broken(selector)?;
        state.calls.push(Call::Click(selector.to_string()));
        state.submitted();
        Ok(())
    }

    async fn select_option(&self, selector: &Selector, value: &str) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.check_broken(selector)?;
        state
            .calls
            .push(Call::Select(selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Evaluate(script.to_string()));
        if script.contains("submit()") {
            state.submitted();
        }
        Ok(Value::Null)
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        if self.state.lock().unwrap().matches(selector) > 0 {
            Ok(())
        } else {
            Err(AutomationError::Timeout(format!(
                "{selector} not visible within {timeout:?}"
            )))
        }
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> Result<(), AutomationError> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Screenshot(path.to_path_buf()));
            state.fail_screenshots
        };
        if fail {
            return Err(AutomationError::Protocol("capture failed".into()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG")?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::PressKey(key.to_string()));
        if state.fail_keys {
            return Err(AutomationError::Protocol("no page to receive keys".into()));
        }
        Ok(())
    }

    async fn wait_for_timeout(&self, duration: Duration) {
        self.state.lock().unwrap().calls.push(Call::Pause(duration));
    }
}
