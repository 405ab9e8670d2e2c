use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::driver::BrowserDriver;
use crate::errors::AutomationError;
use crate::interact::{enter_value, SubmitAction};
use crate::record::{NormalizedRecord, TimeParts};
use crate::selector::Selector;

/// Where each record field goes on the trip-log form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormMap {
    pub date: String,
    pub start_hour: String,
    pub start_minute: String,
    pub end_hour: String,
    pub end_minute: String,
    pub start_km: String,
    pub end_km: String,
    pub distance: String,
    pub company: String,
    pub endpoint: String,
    pub work_kind: String,
    pub parking: String,
    pub toll: String,
    /// Tried in order; the first one present is clicked
    pub submit_controls: Vec<String>,
}

impl Default for FormMap {
    fn default() -> Self {
        Self {
            date: "#datepicker".into(),
            start_hour: "#start_hh".into(),
            start_minute: "#start_mm".into(),
            end_hour: "#end_hh".into(),
            end_minute: "#end_mm".into(),
            start_km: "#start_km".into(),
            end_km: "#end_km".into(),
            distance: "#far".into(),
            company: r#"[name="end_company"]"#.into(),
            endpoint: "#end_point".into(),
            work_kind: r#"[name="run_memo"]"#.into(),
            parking: "#parking".into(),
            toll: "#toll".into(),
            submit_controls: vec![
                r#"button[type="submit"]"#.into(),
                r#"input[type="submit"]"#.into(),
            ],
        }
    }
}

impl FormMap {
    fn fields(&self) -> [(&'static str, &String); 13] {
        [
            ("date", &self.date),
            ("start_hour", &self.start_hour),
            ("start_minute", &self.start_minute),
            ("end_hour", &self.end_hour),
            ("end_minute", &self.end_minute),
            ("start_km", &self.start_km),
            ("end_km", &self.end_km),
            ("distance", &self.distance),
            ("company", &self.company),
            ("endpoint", &self.endpoint),
            ("work_kind", &self.work_kind),
            ("parking", &self.parking),
            ("toll", &self.toll),
        ]
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, selector) in self.fields() {
            Selector::from(selector.as_str())
                .validate()
                .map_err(|reason| format!("form field `{name}`: {reason}"))?;
        }
        for selector in &self.submit_controls {
            Selector::from(selector.as_str())
                .validate()
                .map_err(|reason| format!("submit control `{selector}`: {reason}"))?;
        }
        Ok(())
    }

    pub fn submit_candidates(&self) -> Vec<Selector> {
        self.submit_controls.iter().map(Selector::from).collect()
    }
}

/// Writes one normalized record into the form and submits it.
pub struct Transcriber {
    driver: Arc<dyn BrowserDriver>,
    form: FormMap,
}

impl Transcriber {
    pub fn new(driver: Arc<dyn BrowserDriver>, form: FormMap) -> Self {
        Self { driver, form }
    }

    async fn type_into(&self, field: &str, value: &str) -> Result<(), AutomationError> {
        self.driver.fill(&Selector::from(field), value).await
    }

    /// Hour and minute controls may be selects or text boxes; empty parts are left alone.
    async fn write_time(
        &self,
        hour_field: &str,
        minute_field: &str,
        time: &TimeParts,
    ) -> Result<(), AutomationError> {
        let driver = self.driver.as_ref();
        if !time.hour.is_empty() {
            enter_value(driver, &Selector::from(hour_field), &time.hour).await?;
        }
        if !time.minute.is_empty() {
            enter_value(driver, &Selector::from(minute_field), &time.minute).await?;
        }
        Ok(())
    }

    /// Populate every mapped field. Nothing is submitted.
    pub async fn fill(&self, record: &NormalizedRecord) -> Result<(), AutomationError> {
        let form = &self.form;

        self.type_into(&form.date, &record.date).await?;
        self.write_time(&form.start_hour, &form.start_minute, &record.start)
            .await?;
        self.write_time(&form.end_hour, &form.end_minute, &record.end)
            .await?;
        self.type_into(&form.start_km, &record.start_km).await?;
        self.type_into(&form.end_km, &record.end_km).await?;
        self.type_into(&form.distance, &record.distance).await?;
        self.type_into(&form.company, &record.company).await?;
        self.type_into(&form.endpoint, &record.endpoint).await?;
        self.type_into(&form.work_kind, &record.work_kind).await?;
        self.type_into(&form.parking, &record.parking).await?;
        self.type_into(&form.toll, &record.toll).await?;
        Ok(())
    }

    pub async fn submit(&self) -> Result<SubmitAction, AutomationError> {
        let driver = self.driver.as_ref();
        let action = SubmitAction::resolve(driver, &self.form.submit_candidates()).await?;
        action.perform(driver).await?;
        Ok(action)
    }

    #[instrument(skip(self, record), fields(row = record.row))]
    pub async fn transcribe(
        &self,
        record: &NormalizedRecord,
    ) -> Result<SubmitAction, AutomationError> {
        self.fill(record).await?;
        let action = self.submit().await?;
        debug!(?action, "Row submitted");
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_form_map_is_valid() {
        let form = FormMap::default();
        assert!(form.validate().is_ok());
        assert_eq!(
            form.submit_candidates(),
            vec![
                Selector::css(r#"button[type="submit"]"#),
                Selector::css(r#"input[type="submit"]"#),
            ]
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let form: FormMap = serde_yaml::from_str("distance: \"#distance\"\n").unwrap();
        assert_eq!(form.distance, "#distance");
        assert_eq!(form.date, "#datepicker");
    }

    #[test]
    fn empty_selector_is_rejected() {
        let form = FormMap {
            toll: String::new(),
            ..FormMap::default()
        };
        let err = form.validate().unwrap_err();
        assert!(err.contains("toll"), "{err}");
    }
}
