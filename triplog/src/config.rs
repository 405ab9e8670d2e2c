//! Run configuration.
//!
//! Every setting has a default matching the operator's template and intranet
//! form. An optional YAML file overrides any subset of them; command-line
//! flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{Authenticator, CredentialResolver, LoginProfile};
use crate::browser::LaunchOptions;
use crate::driver::BrowserDriver;
use crate::errors::{Result, TriplogError};
use crate::normalize::{AliasTable, Normalizer};
use crate::record::ColumnLayout;
use crate::runner::{Runner, DEFAULT_START_ROW};
use crate::transcribe::{FormMap, Transcriber};
use crate::verify::{Verifier, VerifyProfile};

pub const DEFAULT_URL: &str = "http://intra.k-one.co.kr/car_drive_add.asp";
pub const DEFAULT_WORKBOOK: &str = "2025 8월 자동입력 차량일지양식.xlsx";
pub const DEFAULT_PROFILE_DIR: &str = "chrome_profile";

/// Extra aliases merged over the built-in tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AliasOverrides {
    pub company: AliasTable,
    pub work_kind: AliasTable,
    pub endpoint: AliasTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub workbook: PathBuf,
    /// First sheet when unset
    pub sheet: Option<String>,
    pub start_row: u32,
    pub url: String,
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub chrome: Option<PathBuf>,
    pub columns: ColumnLayout,
    pub form: FormMap,
    pub login: LoginProfile,
    pub verify: VerifyProfile,
    pub aliases: AliasOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workbook: PathBuf::from(DEFAULT_WORKBOOK),
            sheet: None,
            start_row: DEFAULT_START_ROW,
            url: DEFAULT_URL.to_string(),
            profile_dir: PathBuf::from(DEFAULT_PROFILE_DIR),
            headless: false,
            chrome: None,
            columns: ColumnLayout::default(),
            form: FormMap::default(),
            login: LoginProfile::default(),
            verify: VerifyProfile::default(),
            aliases: AliasOverrides::default(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(content: &str) -> Result<Config> {
        serde_yaml::from_str(content).map_err(|e| TriplogError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TriplogError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| TriplogError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_row == 0 {
            return Err(TriplogError::Config("start_row is 1-based".into()));
        }
        if self.url.trim().is_empty() {
            return Err(TriplogError::Config("url must not be empty".into()));
        }
        self.columns
            .validate()
            .and_then(|()| self.form.validate())
            .and_then(|()| self.login.validate())
            .and_then(|()| self.verify.validate())
            .map_err(TriplogError::Config)?;
        self.normalizer().map(|_| ())
    }

    /// Built-in alias tables with this config's overrides applied.
    pub fn normalizer(&self) -> Result<Normalizer> {
        let mut company = AliasTable::builtin_company();
        company.extend(&self.aliases.company);
        let mut work_kind = AliasTable::builtin_work_kind();
        work_kind.extend(&self.aliases.work_kind);
        let mut endpoint = AliasTable::builtin_endpoint();
        endpoint.extend(&self.aliases.endpoint);

        for (name, table) in [
            ("company", &company),
            ("work_kind", &work_kind),
            ("endpoint", &endpoint),
        ] {
            if let Some(label) = table.non_idempotent_label() {
                return Err(TriplogError::Config(format!(
                    "{name} alias `{label}` is both a canonical label and an alias"
                )));
            }
        }
        Ok(Normalizer::new(company, work_kind, endpoint))
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            executable: self.chrome.clone(),
            profile_dir: self.profile_dir.clone(),
            headless: self.headless,
            ..LaunchOptions::default()
        }
    }

    pub fn build_runner(
        &self,
        driver: Arc<dyn BrowserDriver>,
        resolver: CredentialResolver,
    ) -> Result<Runner> {
        let authenticator = Authenticator::new(
            driver.clone(),
            self.login.clone(),
            self.url.clone(),
            resolver,
        );
        Ok(Runner::new(
            authenticator,
            self.normalizer()?,
            Transcriber::new(driver.clone(), self.form.clone()),
            Verifier::new(driver, self.verify.clone()),
            self.columns.clone(),
        )
        .with_start_row(self.start_row))
    }
}
