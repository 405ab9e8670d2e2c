//! Chrome with a persistent profile, driven over the DevTools protocol.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::cdp::CdpConnection;
use crate::driver::BrowserDriver;
use crate::errors::AutomationError;
use crate::selector::{js_string, Selector};

const DEVTOOLS_PORT_FILE: &str = "DevToolsActivePort";

/// Executables tried on `PATH` when none is configured.
const CHROME_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

#[cfg(target_os = "macos")]
const CHROME_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];
#[cfg(target_os = "windows")]
const CHROME_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CHROME_PATHS: &[&str] = &[];

pub fn find_chrome() -> Option<PathBuf> {
    CHROME_NAMES
        .iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            CHROME_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
        })
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    /// Cookies and logins persist here between runs
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub startup_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            profile_dir: PathBuf::from("chrome_profile"),
            headless: false,
            startup_timeout: Duration::from_secs(20),
        }
    }
}

impl LaunchOptions {
    fn args(&self, profile_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--user-data-dir={}", profile_dir.display()),
            "--remote-debugging-port=0".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.push("about:blank".to_string());
        args
    }
}

#[derive(Debug, Clone)]
pub struct PageOptions {
    /// Budget for an element to attach before fill/click/select act on it
    pub action_timeout: Duration,
    pub navigation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    id: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

/// A running Chrome process owned by this run.
pub struct ChromeSession {
    child: Child,
    port: u16,
    browser_ws_path: String,
    http: reqwest::Client,
}

impl ChromeSession {
    #[instrument(skip(options), fields(profile = %options.profile_dir.display()))]
    pub async fn launch(options: &LaunchOptions) -> Result<ChromeSession, AutomationError> {
        let executable = match &options.executable {
            Some(path) => path.clone(),
            None => find_chrome().ok_or_else(|| {
                AutomationError::Launch(
                    "no Chrome/Chromium executable found; pass --chrome".to_string(),
                )
            })?,
        };

        tokio::fs::create_dir_all(&options.profile_dir).await?;
        let profile_dir = tokio::fs::canonicalize(&options.profile_dir).await?;

        // A stale port file from a crashed run would point at a dead port.
        let port_file = profile_dir.join(DEVTOOLS_PORT_FILE);
        if let Err(e) = tokio::fs::remove_file(&port_file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        info!("Launching {}", executable.display());
        let mut child = Command::new(&executable)
            .args(options.args(&profile_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AutomationError::Launch(format!("{}: {e}", executable.display())))?;

        let deadline = Instant::now() + options.startup_timeout;
        let (port, browser_ws_path) = loop {
            if let Ok(text) = tokio::fs::read_to_string(&port_file).await {
                let mut lines = text.lines();
                if let (Some(port), Some(path)) = (lines.next(), lines.next()) {
                    if let Ok(port) = port.trim().parse::<u16>() {
                        break (port, path.trim().to_string());
                    }
                }
            }
            if let Some(status) = child.try_wait()? {
                return Err(AutomationError::Launch(format!(
                    "browser exited early with {status}; is another browser using {}?",
                    profile_dir.display()
                )));
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(AutomationError::Launch(format!(
                    "no DevTools port after {:?}",
                    options.startup_timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        };
        debug!(port, "DevTools endpoint ready");

        Ok(ChromeSession {
            child,
            port,
            browser_ws_path,
            http: reqwest::Client::new(),
        })
    }

    /// Open a fresh tab and attach to it.
    pub async fn new_page(&self, options: PageOptions) -> Result<CdpPage, AutomationError> {
        let url = format!("http://127.0.0.1:{}/json/new?about:blank", self.port);
        let target: TargetInfo = self
            .http
            .put(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AutomationError::Protocol(format!("open tab: {e}")))?
            .json()
            .await
            .map_err(|e| AutomationError::Protocol(format!("open tab response: {e}")))?;
        debug!(target = %target.id, "Attached to new tab");

        let connection = CdpConnection::connect(&target.ws_url).await?;
        CdpPage::attach(connection, options).await
    }

    /// Ask the browser to exit so the profile is flushed; kill it if it lingers.
    pub async fn close(mut self) -> Result<(), AutomationError> {
        let ws_url = format!("ws://127.0.0.1:{}{}", self.port, self.browser_ws_path);
        match CdpConnection::connect(&ws_url).await {
            Ok(browser) => {
                if let Err(e) = browser.call("Browser.close", json!({})).await {
                    debug!("Browser.close: {e}");
                }
            }
            Err(e) => debug!("Could not reach browser endpoint for a clean close: {e}"),
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(%status, "Browser exited");
            }
            Err(_elapsed) => {
                warn!("Browser did not exit in time; killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

// Shared JS: visibility test used by wait_for_selector.
const IS_VISIBLE_JS: &str = "(e) => !!(e.offsetWidth || e.offsetHeight || e.getClientRects().length) \
     && getComputedStyle(e).visibility !== 'hidden'";

/// One tab, driven through its own DevTools connection.
pub struct CdpPage {
    connection: CdpConnection,
    options: PageOptions,
}

impl CdpPage {
    /// Enables page events so dialogs are reported and answered.
    pub async fn attach(
        connection: CdpConnection,
        options: PageOptions,
    ) -> Result<CdpPage, AutomationError> {
        connection.call("Page.enable", json!({})).await?;
        Ok(Self {
            connection,
            options,
        })
    }

    /// `Runtime.evaluate` by value; thrown exceptions become `Script` errors.
    async fn eval(&self, expression: &str) -> Result<Value, AutomationError> {
        let response = self
            .connection
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("uncaught exception");
            return Err(AutomationError::Script(text.to_string()));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Poll `probe` (a JS boolean expression) until true or `timeout`.
    /// Errors while the page is mid-navigation count as "not yet", and a
    /// probe still pending at the deadline counts as false.
    async fn poll_until(&self, probe: &str, timeout: Duration) -> Result<bool, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.eval(probe)).await {
                Ok(Ok(Value::Bool(true))) => return Ok(true),
                Ok(Ok(_)) => {}
                Ok(Err(e @ AutomationError::Timeout(_))) => return Err(e),
                Ok(Err(e)) => trace!("Probe failed, retrying: {e}"),
                Err(_elapsed) => {
                    debug!("Probe still pending after {timeout:?}");
                    return Ok(false);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn wait_attached(&self, selector: &Selector) -> Result<(), AutomationError> {
        if let Err(reason) = selector.validate() {
            return Err(AutomationError::InvalidSelector(reason));
        }
        let probe = format!("({}).length > 0", selector.to_js_query());
        if self.poll_until(&probe, self.options.action_timeout).await? {
            Ok(())
        } else {
            Err(AutomationError::ElementNotFound(format!(
                "{selector} (waited {:?})",
                self.options.action_timeout
            )))
        }
    }

    /// Runs `body` with `el` bound to the first match; `body` returns a status string.
    async fn with_element(
        &self,
        selector: &Selector,
        body: &str,
    ) -> Result<String, AutomationError> {
        self.wait_attached(selector).await?;
        let script = format!(
            "(() => {{ const el = ({})[0]; if (!el) return 'missing'; {} }})()",
            selector.to_js_query(),
            body
        );
        match self.eval(&script).await? {
            Value::String(status) if status == "missing" => {
                Err(AutomationError::ElementNotFound(selector.to_string()))
            }
            Value::String(status) => Ok(status),
            other => Ok(other.to_string()),
        }
    }

    async fn dispatch_key(&self, kind: &str, key: &KeySpec) -> Result<(), AutomationError> {
        let mut params = json!({
            "type": kind,
            "key": key.key,
            "code": key.code,
            "windowsVirtualKeyCode": key.key_code,
            "nativeVirtualKeyCode": key.key_code,
        });
        if kind == "keyDown" {
            if let Some(text) = key.text {
                params["text"] = json!(text);
            }
        }
        self.connection
            .call("Input.dispatchKeyEvent", params)
            .await
            .map(|_| ())
    }
}

struct KeySpec {
    key: &'static str,
    code: &'static str,
    key_code: u32,
    text: Option<&'static str>,
}

fn key_spec(key: &str) -> Option<KeySpec> {
    let spec = match key {
        "Enter" => KeySpec {
            key: "Enter",
            code: "Enter",
            key_code: 13,
            text: Some("\r"),
        },
        "Escape" => KeySpec {
            key: "Escape",
            code: "Escape",
            key_code: 27,
            text: None,
        },
        "Tab" => KeySpec {
            key: "Tab",
            code: "Tab",
            key_code: 9,
            text: None,
        },
        _ => return None,
    };
    Some(spec)
}

#[async_trait::async_trait]
impl BrowserDriver for CdpPage {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        let response = self
            .connection
            .call("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = response.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(AutomationError::Protocol(format!(
                    "navigation to {url} failed: {error_text}"
                )));
            }
        }

        // Equivalent of waiting for DOMContentLoaded.
        let ready = self
            .poll_until(
                "document.readyState !== 'loading'",
                self.options.navigation_timeout,
            )
            .await?;
        if !ready {
            return Err(AutomationError::Timeout(format!(
                "{url} did not finish loading within {:?}",
                self.options.navigation_timeout
            )));
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        Ok(self
            .eval("location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn content(&self) -> Result<String, AutomationError> {
        Ok(self
            .eval("document.documentElement ? document.documentElement.outerHTML : ''")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn count(&self, selector: &Selector) -> Result<usize, AutomationError> {
        if let Err(reason) = selector.validate() {
            return Err(AutomationError::InvalidSelector(reason));
        }
        let value = self
            .eval(&format!("({}).length", selector.to_js_query()))
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn tag_name(&self, selector: &Selector) -> Result<Option<String>, AutomationError> {
        let script = format!(
            "(() => {{ const el = ({})[0]; return el ? el.tagName.toLowerCase() : null; }})()",
            selector.to_js_query()
        );
        Ok(self.eval(&script).await?.as_str().map(str::to_string))
    }

    #[instrument(level = "debug", skip(self, value), fields(selector = %selector))]
    async fn fill(&self, selector: &Selector, value: &str) -> Result<(), AutomationError> {
        let body = format!(
            "el.focus(); \
             if ('value' in el) {{ el.value = {v}; }} else {{ el.textContent = {v}; }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return 'ok';",
            v = js_string(value)
        );
        self.with_element(selector, &body).await.map(|_| ())
    }

    #[instrument(level = "debug", skip(self), fields(selector = %selector))]
    async fn click(&self, selector: &Selector) -> Result<(), AutomationError> {
        self.with_element(
            selector,
            "el.scrollIntoView({ block: 'center' }); el.click(); return 'ok';",
        )
        .await
        .map(|_| ())
    }

    #[instrument(level = "debug", skip(self), fields(selector = %selector))]
    async fn select_option(
        &self,
        selector: &Selector,
        value: &str,
    ) -> Result<(), AutomationError> {
        let body = format!(
            "const v = {}; \
             const opts = Array.from(el.options || []); \
             const hit = opts.find(o => o.value === v) || opts.find(o => o.label.trim() === v); \
             if (!hit) return 'no-option'; \
             el.value = hit.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return 'ok';",
            js_string(value)
        );
        match self.with_element(selector, &body).await?.as_str() {
            "no-option" => Err(AutomationError::OptionNotFound(format!(
                "{selector} has no option {value:?}"
            ))),
            _ => Ok(()),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AutomationError> {
        self.eval(script).await
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        if let Err(reason) = selector.validate() {
            return Err(AutomationError::InvalidSelector(reason));
        }
        let probe = format!(
            "({}).some({})",
            selector.to_js_query(),
            IS_VISIBLE_JS
        );
        if self.poll_until(&probe, timeout).await? {
            Ok(())
        } else {
            Err(AutomationError::Timeout(format!(
                "{selector} not visible within {timeout:?}"
            )))
        }
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), AutomationError> {
        let mut params = json!({ "format": "png", "captureBeyondViewport": full_page });
        if full_page {
            let metrics = self
                .connection
                .call("Page.getLayoutMetrics", json!({}))
                .await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"))
                .cloned()
                .unwrap_or(Value::Null);
            let width = size.get("width").and_then(Value::as_f64).unwrap_or(0.0);
            let height = size.get("height").and_then(Value::as_f64).unwrap_or(0.0);
            if width > 0.0 && height > 0.0 {
                params["clip"] = json!({
                    "x": 0, "y": 0, "width": width, "height": height, "scale": 1
                });
            }
        }

        let response = self
            .connection
            .call("Page.captureScreenshot", params)
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AutomationError::Protocol("screenshot without data".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| AutomationError::Protocol(format!("screenshot payload: {e}")))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        let spec = key_spec(key).ok_or_else(|| {
            AutomationError::Script(format!("unsupported key {key:?}"))
        })?;
        self.dispatch_key("keyDown", &spec).await?;
        self.dispatch_key("keyUp", &spec).await
    }

    async fn wait_for_timeout(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_use_profile_and_dynamic_port() {
        let options = LaunchOptions {
            headless: true,
            ..LaunchOptions::default()
        };
        let args = options.args(Path::new("/tmp/profile"));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));

        let headed = LaunchOptions::default().args(Path::new("p"));
        assert!(!headed.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn known_keys_have_codes() {
        assert_eq!(key_spec("Enter").map(|k| k.key_code), Some(13));
        assert_eq!(key_spec("Escape").map(|k| k.key_code), Some(27));
        assert!(key_spec("F13").is_none());
    }

    #[test]
    fn target_info_reads_devtools_shape() {
        let info: TargetInfo = serde_json::from_str(
            r#"{"id":"ABC","type":"page","url":"about:blank",
                "webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/ABC"}"#,
        )
        .unwrap();
        assert_eq!(info.id, "ABC");
        assert!(info.ws_url.ends_with("/page/ABC"));
    }

    async fn attached(url: &str) -> CdpPage {
        let connection = CdpConnection::connect(url).await.unwrap();
        CdpPage::attach(connection, PageOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn attach_enables_page_events() {
        let (url, mut seen) = crate::cdp::fake::devtools(&[], None).await;
        let page = attached(&url).await;

        assert_eq!(seen.recv().await.unwrap()["method"], "Page.enable");
        assert_eq!(page.current_url().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn stalled_probe_ends_at_the_wait_budget() {
        let (url, _seen) = crate::cdp::fake::devtools(&["Runtime.evaluate"], None).await;
        let page = attached(&url).await;

        let started = std::time::Instant::now();
        let err = page
            .wait_for_selector(&Selector::css(".toast.success"), Duration::from_millis(300))
            .await
            .unwrap_err();

        assert!(matches!(err, AutomationError::Timeout(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn alert_after_submit_does_not_block_the_page() {
        let (url, mut seen) = crate::cdp::fake::devtools(&[], Some("submit()")).await;
        let page = attached(&url).await;

        page.evaluate("document.forms[0].submit()").await.unwrap();
        let url = tokio::time::timeout(Duration::from_secs(5), page.current_url())
            .await
            .expect("page stayed blocked behind the alert")
            .unwrap();
        assert_eq!(url, "ok");

        let mut handled = false;
        while let Ok(command) = seen.try_recv() {
            handled |= command["method"] == "Page.handleJavaScriptDialog";
        }
        assert!(handled);
    }
}
