//! Selector grammar understood by the browser driver.
//!
//! Strings follow the Playwright conventions the form signals are written in:
//!
//! - `text=등록되었습니다` matches the innermost element whose rendered text
//!   contains the fragment
//! - `css=#id` or any other string is a CSS selector list (commas stay CSS)
//! - `a || b` matches whatever either side matches

/// Represents ways to locate an element in the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// CSS selector list, passed to `querySelectorAll` as is
    Css(String),
    /// Select by rendered text fragment
    Text(String),
    /// Logical OR: any selector can match
    Or(Vec<Selector>),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    pub fn css(s: impl Into<String>) -> Self {
        Selector::Css(s.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Selector::Text(s.into())
    }

    /// Flattens the given selectors into a single alternative.
    pub fn any<I>(selectors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Selector>,
    {
        let mut parts = Vec::new();
        for selector in selectors {
            match selector.into() {
                Selector::Or(mut inner) => parts.append(&mut inner),
                s => parts.push(s),
            }
        }
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Selector::Or(parts)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Selector::Invalid(reason) => Err(reason.clone()),
            Selector::Or(parts) if parts.is_empty() => Err("empty alternative".to_string()),
            Selector::Or(parts) => parts.iter().try_for_each(Selector::validate),
            _ => Ok(()),
        }
    }

    /// JavaScript expression evaluating to an array of the matching elements,
    /// in document order per alternative and without duplicates.
    pub fn to_js_query(&self) -> String {
        match self {
            Selector::Css(css) => format!(
                "Array.from(document.querySelectorAll({}))",
                js_string(css)
            ),
            Selector::Text(fragment) => format!(
                "((needle) => {{ \
                    const hits = Array.from(document.querySelectorAll('body, body *')) \
                        .filter(e => (e.innerText || e.textContent || '').includes(needle)); \
                    return hits.filter(e => !Array.from(e.children) \
                        .some(c => (c.innerText || c.textContent || '').includes(needle))); \
                }})({})",
                js_string(fragment)
            ),
            Selector::Or(parts) => {
                let queries: Vec<String> = parts.iter().map(Selector::to_js_query).collect();
                format!("Array.from(new Set([].concat({})))", queries.join(", "))
            }
            Selector::Invalid(_) => "[]".to_string(),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "{css}"),
            Selector::Text(fragment) => write!(f, "text={fragment}"),
            Selector::Or(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Selector::Invalid(reason) => write!(f, "<invalid: {reason}>"),
        }
    }
}

pub(crate) fn js_string(s: &str) -> String {
    // serde_json string escaping is a valid JS string literal
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn parse_atomic_selector(s: &str) -> Selector {
    if s.is_empty() {
        return Selector::Invalid("empty selector".to_string());
    }
    if let Some(fragment) = s.strip_prefix("text=") {
        let fragment = fragment.trim().trim_matches('"');
        if fragment.is_empty() {
            return Selector::Invalid("text= needs a fragment".to_string());
        }
        return Selector::Text(fragment.to_string());
    }
    if let Some(css) = s.strip_prefix("css=") {
        return parse_atomic_selector(css.trim()).into_css_only();
    }
    Selector::Css(s.to_string())
}

impl Selector {
    fn into_css_only(self) -> Selector {
        match self {
            Selector::Text(t) => Selector::Css(format!("text={t}")),
            other => other,
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();

        if s.contains("||") {
            let parts: Vec<Selector> = s
                .split("||")
                .map(|p| parse_atomic_selector(p.trim()))
                .collect();
            if let Some(Selector::Invalid(reason)) =
                parts.iter().find(|p| matches!(p, Selector::Invalid(_)))
            {
                return Selector::Invalid(format!("Parse error in alternative: {reason}"));
            }
            return Selector::Or(parts);
        }

        parse_atomic_selector(s)
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<&String> for Selector {
    fn from(s: &String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<&Selector> for Selector {
    fn from(s: &Selector) -> Self {
        s.clone()
    }
}
