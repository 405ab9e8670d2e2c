//! Login-state inference, login, and credential lookup.
//!
//! The intranet exposes no session API, so "logged out" is inferred from the
//! page: a login-like URL, or an identity field next to a password field.
//! That is a heuristic. A page that renders a password field for another
//! reason reads as logged out, and a login page on an unhinted URL with
//! unusual field names reads as logged in.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::driver::BrowserDriver;
use crate::errors::{AutomationError, Result, TriplogError};
use crate::interact::SubmitAction;
use crate::locator::Locator;
use crate::selector::Selector;
use crate::vault::CredentialVault;

/// Vault service every entry of this tool lives under.
pub const SERVICE_NAME: &str = "NKP_AUTOFILL";
/// Vault key holding the identifier used last.
pub const LAST_USER_KEY: &str = "last_user";

const SESSION_PROBE_ATTEMPTS: u32 = 3;
const SESSION_PROBE_PAUSE: Duration = Duration::from_millis(500);

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    secret: String,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// Both halves must be present and non-empty.
    pub fn from_pair(identifier: Option<String>, secret: Option<String>) -> Option<Self> {
        match (identifier, secret) {
            (Some(id), Some(pw)) if !id.is_empty() && !pw.is_empty() => Some(Self::new(id, pw)),
            _ => None,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Interactive capture of an identifier and secret.
pub trait CredentialPrompt: Send + Sync {
    /// Returns the raw `(identifier, secret)` the operator typed.
    fn ask(&self) -> Result<(String, String)>;
}

/// Finds credentials: environment first, then the vault, then the operator.
pub struct CredentialResolver {
    env: Option<Credential>,
    vault: Arc<dyn CredentialVault>,
    prompt: Arc<dyn CredentialPrompt>,
}

impl CredentialResolver {
    pub fn new(
        env: Option<Credential>,
        vault: Arc<dyn CredentialVault>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Self {
        Self {
            env,
            vault,
            prompt,
        }
    }

    pub fn resolve(&self) -> Result<Credential> {
        if let Some(credential) = &self.env {
            debug!(identifier = %credential.identifier, "Using credentials from environment");
            return Ok(credential.clone());
        }

        if let Some(identifier) = self.vault.get(SERVICE_NAME, LAST_USER_KEY)? {
            if let Some(secret) = self.vault.get(SERVICE_NAME, &identifier)? {
                debug!(%identifier, "Using credentials from vault");
                return Ok(Credential::new(identifier, secret));
            }
            warn!(%identifier, "Vault points at an identifier with no stored secret");
        }

        info!("No stored account; asking once and saving it to the vault");
        let (identifier, secret) = self.prompt.ask()?;
        let credential =
            Credential::from_pair(Some(identifier.trim().into()), Some(secret.trim().into()))
                .ok_or(TriplogError::MissingCredentials)?;

        // Secret before pointer: a stored pointer must always have its secret.
        self.vault
            .set(SERVICE_NAME, &credential.identifier, credential.secret())?;
        self.vault
            .set(SERVICE_NAME, LAST_USER_KEY, &credential.identifier)?;
        Ok(credential)
    }
}

/// Drops the remembered account. Returns the identifier that was removed.
///
/// Either deletion may fail if the vault is already half-cleared; that is
/// logged and ignored.
pub fn reset_credentials(vault: &dyn CredentialVault, service: &str) -> Result<Option<String>> {
    let Some(identifier) = vault.get(service, LAST_USER_KEY)? else {
        return Ok(None);
    };

    if let Err(e) = vault.delete(service, LAST_USER_KEY) {
        debug!("Ignoring failure deleting the last-user pointer: {e}");
    }
    if let Err(e) = vault.delete(service, &identifier) {
        debug!(%identifier, "Ignoring failure deleting the stored secret: {e}");
    }
    Ok(Some(identifier))
}

/// Page signals that drive login detection and confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginProfile {
    /// Case-insensitive URL fragments of login pages
    pub url_hints: Vec<String>,
    pub identity_field: String,
    pub password_field: String,
    /// Submit controls in order of preference
    pub submit_controls: Vec<String>,
    pub logged_in_signals: Vec<String>,
    pub failure_signals: Vec<String>,
    /// Body text of the "no permission" page shown to expired sessions
    pub access_denied_text: String,
    pub success_budget_ms: u64,
    pub failure_budget_ms: u64,
    pub grace_ms: u64,
    /// Fail instead of continuing when neither signal shows up
    pub strict: bool,
}

impl Default for LoginProfile {
    fn default() -> Self {
        Self {
            url_hints: vec!["login".into(), "member/login".into(), "car_login".into()],
            identity_field: r#"input[name="user_id"], #user_id, #userid, input#id"#.into(),
            password_field: r#"input[name="user_pw"], #user_pw, #userpw, input[type="password"]"#
                .into(),
            submit_controls: vec![
                r#"button[type="submit"], input[type="submit"], #loginBtn"#.into(),
            ],
            logged_in_signals: vec![
                "text=로그아웃".into(),
                r#"a[href*="logout"]"#.into(),
                "text=메인".into(),
                "nav .user".into(),
            ],
            failure_signals: vec![
                ".alert-danger".into(),
                ".error".into(),
                "text=아이디".into(),
                "text=비밀번호".into(),
            ],
            access_denied_text: "본 페이지에 접근 권한이 없습니다".into(),
            success_budget_ms: 8_000,
            failure_budget_ms: 2_000,
            grace_ms: 1_200,
            strict: false,
        }
    }
}

impl LoginProfile {
    pub fn success_budget(&self) -> Duration {
        Duration::from_millis(self.success_budget_ms)
    }

    pub fn failure_budget(&self) -> Duration {
        Duration::from_millis(self.failure_budget_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut all: Vec<&String> = vec![&self.identity_field, &self.password_field];
        all.extend(&self.submit_controls);
        all.extend(&self.logged_in_signals);
        all.extend(&self.failure_signals);
        for s in all {
            Selector::from(s.as_str())
                .validate()
                .map_err(|reason| format!("login selector `{s}`: {reason}"))?;
        }
        if self.logged_in_signals.is_empty() {
            return Err("login profile needs at least one logged-in signal".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unknown,
    CheckingLoginState,
    AlreadyAuthenticated,
    NeedsLogin,
    Submitting,
    AuthenticatedOk,
    AuthFailed,
}

impl AuthState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuthState::AlreadyAuthenticated | AuthState::AuthenticatedOk | AuthState::AuthFailed
        )
    }
}

pub struct Authenticator {
    driver: Arc<dyn BrowserDriver>,
    profile: LoginProfile,
    target_url: String,
    resolver: CredentialResolver,
    credential: Option<Credential>,
    state: AuthState,
}

impl Authenticator {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        profile: LoginProfile,
        target_url: impl Into<String>,
        resolver: CredentialResolver,
    ) -> Self {
        Self {
            driver,
            profile,
            target_url: target_url.into(),
            resolver,
            credential: None,
            state: AuthState::Unknown,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn transition(&mut self, next: AuthState) {
        debug!(from = ?self.state, to = ?next, "Auth state");
        self.state = next;
    }

    /// Login-like URL, or identity and password fields both on the page.
    pub async fn is_logged_out(&self) -> std::result::Result<bool, AutomationError> {
        let url = self.driver.current_url().await?.to_lowercase();
        if self
            .profile
            .url_hints
            .iter()
            .any(|hint| url.contains(&hint.to_lowercase()))
        {
            return Ok(true);
        }

        let identity = Locator::new(self.driver.clone(), self.profile.identity_field.as_str());
        let password = Locator::new(self.driver.clone(), self.profile.password_field.as_str());
        Ok(identity.exists().await? && password.exists().await?)
    }

    async fn access_denied(&self) -> std::result::Result<bool, AutomationError> {
        let content = self.driver.content().await?;
        Ok(content.contains(&self.profile.access_denied_text))
    }

    /// [`is_logged_out`](Self::is_logged_out), or the access-denied page.
    pub async fn needs_login(&self) -> std::result::Result<bool, AutomationError> {
        Ok(self.is_logged_out().await? || self.access_denied().await?)
    }

    /// [`needs_login`](Self::needs_login), retried while the page may be
    /// between documents after a redirect.
    pub async fn check_session(&self) -> std::result::Result<bool, AutomationError> {
        let mut attempt = 1;
        loop {
            match self.needs_login().await {
                Ok(needed) => return Ok(needed),
                Err(e) if attempt < SESSION_PROBE_ATTEMPTS => {
                    debug!(attempt, "Session probe failed, retrying: {e}");
                    self.driver.wait_for_timeout(SESSION_PROBE_PAUSE).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bring the page to a logged-in state, logging in at most once.
    #[instrument(skip(self), fields(target = %self.target_url))]
    pub async fn ensure_session(&mut self) -> Result<AuthState> {
        self.transition(AuthState::CheckingLoginState);

        let denied = self.access_denied().await?;
        if denied {
            info!("Access denied page shown; returning to the form before logging in");
            self.driver.navigate(&self.target_url).await?;
        } else if !self.is_logged_out().await? {
            self.transition(AuthState::AlreadyAuthenticated);
            return Ok(self.state);
        }

        self.transition(AuthState::NeedsLogin);
        if self.credential.is_none() {
            self.credential = Some(self.resolver.resolve()?);
        }
        let credential = self
            .credential
            .clone()
            .ok_or(TriplogError::MissingCredentials)?;

        self.login(&credential).await?;
        self.driver.navigate(&self.target_url).await?;
        Ok(self.state)
    }

    /// Fill and submit the login form, then wait for a verdict.
    #[instrument(skip(self, credential), fields(identifier = %credential.identifier))]
    pub async fn login(&mut self, credential: &Credential) -> Result<()> {
        self.transition(AuthState::Submitting);

        if !self.is_logged_out().await? {
            self.driver.navigate(&self.target_url).await?;
        }

        let driver = self.driver.as_ref();
        driver
            .fill(
                &Selector::from(self.profile.identity_field.as_str()),
                &credential.identifier,
            )
            .await?;
        driver
            .fill(
                &Selector::from(self.profile.password_field.as_str()),
                credential.secret(),
            )
            .await?;

        let candidates: Vec<Selector> = self
            .profile
            .submit_controls
            .iter()
            .map(Selector::from)
            .collect();
        SubmitAction::resolve(driver, &candidates)
            .await?
            .perform(driver)
            .await?;

        let logged_in = Locator::any(self.driver.clone(), &self.profile.logged_in_signals);
        if logged_in
            .appears_within(self.profile.success_budget())
            .await?
        {
            info!("Login confirmed");
            self.transition(AuthState::AuthenticatedOk);
            return Ok(());
        }

        if !self.profile.failure_signals.is_empty() {
            let failed = Locator::any(self.driver.clone(), &self.profile.failure_signals);
            if failed.appears_within(self.profile.failure_budget()).await? {
                self.transition(AuthState::AuthFailed);
                return Err(TriplogError::Authentication(
                    "the login page reported an error; check the ID/password".into(),
                ));
            }
        }

        if self.profile.strict {
            self.transition(AuthState::AuthFailed);
            return Err(TriplogError::Authentication(
                "no logged-in signal appeared after submitting the login form".into(),
            ));
        }

        warn!(
            "Neither a logged-in nor a failure signal appeared; continuing after {:?}",
            self.profile.grace()
        );
        self.driver.wait_for_timeout(self.profile.grace()).await;
        self.transition(AuthState::AuthenticatedOk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;
    use std::sync::Mutex;

    struct FixedPrompt(Mutex<Vec<(String, String)>>);

    impl FixedPrompt {
        fn new(id: &str, pw: &str) -> Arc<Self> {
            Arc::new(Self(Mutex::new(vec![(id.into(), pw.into())])))
        }

        fn asked(&self) -> bool {
            self.0.lock().unwrap().is_empty()
        }
    }

    impl CredentialPrompt for FixedPrompt {
        fn ask(&self) -> Result<(String, String)> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or(TriplogError::MissingCredentials)
        }
    }

    /// Fails every delete, like a vault left half-cleared by another tool.
    struct StubbornVault(MemoryVault);

    impl CredentialVault for StubbornVault {
        fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
            self.0.get(service, key)
        }
        fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
            self.0.set(service, key, secret)
        }
        fn delete(&self, _service: &str, _key: &str) -> Result<()> {
            Err(TriplogError::Vault("backend unavailable".into()))
        }
    }

    #[test]
    fn credential_debug_hides_secret() {
        let c = Credential::new("kim", "hunter2");
        let printed = format!("{c:?}");
        assert!(printed.contains("kim"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn from_pair_requires_both_halves() {
        assert!(Credential::from_pair(Some("a".into()), None).is_none());
        assert!(Credential::from_pair(Some("".into()), Some("b".into())).is_none());
        assert!(Credential::from_pair(Some("a".into()), Some("b".into())).is_some());
    }

    #[test]
    fn vault_credentials_follow_last_user_pointer() {
        let vault = MemoryVault::default();
        vault.set(SERVICE_NAME, LAST_USER_KEY, "lee").unwrap();
        vault.set(SERVICE_NAME, "lee", "pw-lee").unwrap();
        let prompt = FixedPrompt::new("unused", "unused");

        let resolver = CredentialResolver::new(None, Arc::new(vault), prompt.clone());
        let credential = resolver.resolve().unwrap();
        assert_eq!(credential.identifier, "lee");
        assert_eq!(credential.secret(), "pw-lee");
        assert!(!prompt.asked());
    }

    #[test]
    fn prompt_result_is_persisted_with_pointer() {
        let vault = MemoryVault::default();
        let prompt = FixedPrompt::new("  park ", " s3cret ");
        let resolver = CredentialResolver::new(None, Arc::new(vault.clone()), prompt);

        let credential = resolver.resolve().unwrap();
        assert_eq!(credential, Credential::new("park", "s3cret"));
        assert_eq!(
            vault.get(SERVICE_NAME, LAST_USER_KEY).unwrap().as_deref(),
            Some("park")
        );
        assert_eq!(
            vault.get(SERVICE_NAME, "park").unwrap().as_deref(),
            Some("s3cret")
        );
    }

    #[test]
    fn dangling_pointer_falls_through_to_prompt() {
        let vault = MemoryVault::default();
        vault.set(SERVICE_NAME, LAST_USER_KEY, "ghost").unwrap();
        let prompt = FixedPrompt::new("choi", "pw");
        let resolver = CredentialResolver::new(None, Arc::new(vault.clone()), prompt.clone());

        assert_eq!(resolver.resolve().unwrap().identifier, "choi");
        assert!(prompt.asked());
        assert_eq!(
            vault.get(SERVICE_NAME, LAST_USER_KEY).unwrap().as_deref(),
            Some("choi")
        );
    }

    #[test]
    fn empty_prompt_is_missing_credentials() {
        let vault = MemoryVault::default();
        let resolver =
            CredentialResolver::new(None, Arc::new(vault.clone()), FixedPrompt::new("id", "  "));
        assert!(matches!(
            resolver.resolve(),
            Err(TriplogError::MissingCredentials)
        ));
        assert!(vault.is_empty());
    }

    #[test]
    fn reset_removes_pointer_and_secret() {
        let vault = MemoryVault::default();
        vault.set(SERVICE_NAME, LAST_USER_KEY, "lee").unwrap();
        vault.set(SERVICE_NAME, "lee", "pw").unwrap();
        vault.set(SERVICE_NAME, "someone-else", "pw2").unwrap();

        let removed = reset_credentials(&vault, SERVICE_NAME).unwrap();
        assert_eq!(removed.as_deref(), Some("lee"));
        assert_eq!(vault.get(SERVICE_NAME, LAST_USER_KEY).unwrap(), None);
        assert_eq!(vault.get(SERVICE_NAME, "lee").unwrap(), None);
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn reset_without_pointer_is_a_no_op() {
        let vault = MemoryVault::default();
        assert_eq!(reset_credentials(&vault, SERVICE_NAME).unwrap(), None);
    }

    #[test]
    fn reset_tolerates_failed_deletes() {
        let inner = MemoryVault::default();
        inner.set(SERVICE_NAME, LAST_USER_KEY, "lee").unwrap();
        let vault = StubbornVault(inner);
        assert_eq!(
            reset_credentials(&vault, SERVICE_NAME).unwrap().as_deref(),
            Some("lee")
        );
    }

    #[test]
    fn default_profile_is_valid() {
        LoginProfile::default().validate().unwrap();
        assert!(AuthState::AuthFailed.is_terminal());
        assert!(!AuthState::NeedsLogin.is_terminal());
    }
}
