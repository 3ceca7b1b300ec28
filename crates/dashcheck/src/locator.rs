//! Landmark addressing
//!
//! A [`Locator`] names one element on the page by CSS selector, by visible
//! text, or by ARIA role and accessible name. Scenario files use the string
//! form, which mirrors Playwright selector syntax:
//!
//! ```text
//! #stats                      css selector (bare)
//! css=#stats                  css selector (explicit)
//! text=Now Playing            text content, case-insensitive substring
//! text="Now Playing"          exact text
//! text=" Now Playing"i        quoted, but still a substring match
//! role=button[name="Coding"]  role + accessible name
//! role=navigation             role only
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CheckError;

/// How a landmark is found on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    /// CSS selector, e.g. `#stats`
    Css(String),
    /// Text content, e.g. `Now Playing`; `exact` requires the whole
    /// element text to match, case-sensitively
    Text { text: String, exact: bool },
    /// ARIA role with an optional accessible name
    Role { role: String, name: Option<String> },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            exact: false,
        }
    }

    pub fn exact_text(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            exact: true,
        }
    }

    /// Shorthand for `role=button[name="..."]`
    pub fn button(name: impl Into<String>) -> Self {
        Locator::Role {
            role: "button".to_string(),
            name: Some(name.into()),
        }
    }
}

impl FromStr for Locator {
    type Err = CheckError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CheckError::InvalidLocator {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty locator"));
        }

        if let Some(css) = trimmed.strip_prefix("css=") {
            if css.trim().is_empty() {
                return Err(invalid("empty css selector"));
            }
            return Ok(Locator::Css(css.trim().to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("text=") {
            let rest = rest.trim();
            let (text, exact) = match rest.strip_suffix('i').and_then(quoted_inner) {
                Some(inner) => (inner, false),
                None => match quoted_inner(rest) {
                    Some(inner) => (inner, true),
                    None => (rest.to_string(), false),
                },
            };
            if text.is_empty() {
                return Err(invalid("empty text"));
            }
            return Ok(Locator::Text { text, exact });
        }

        if let Some(rest) = trimmed.strip_prefix("role=") {
            return parse_role(rest).map_err(|reason| invalid(reason));
        }

        Ok(Locator::Css(trimmed.to_string()))
    }
}

fn parse_role(rest: &str) -> Result<Locator, &'static str> {
    let (role, filter) = match rest.find('[') {
        Some(pos) => (&rest[..pos], Some(&rest[pos..])),
        None => (rest, None),
    };

    let role = role.trim();
    if role.is_empty() || !role.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err("role must be a non-empty ARIA role name");
    }

    let name = match filter {
        None => None,
        Some(filter) => {
            let inner = filter
                .strip_prefix('[')
                .and_then(|f| f.strip_suffix(']'))
                .ok_or("unterminated role filter")?;
            let value = inner
                .trim()
                .strip_prefix("name=")
                .ok_or("only the name filter is supported")?;
            let value = unquote(value.trim());
            if value.is_empty() {
                return Err("empty accessible name");
            }
            Some(value)
        }
    };

    Ok(Locator::Role {
        role: role.to_ascii_lowercase(),
        name,
    })
}

fn unquote(value: &str) -> String {
    quoted_inner(value).unwrap_or_else(|| value.to_string())
}

/// Contents of a `"..."` or `'...'` literal with `\"` / `\\` escapes undone
fn quoted_inner(value: &str) -> Option<String> {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if !quoted {
        return None;
    }

    let inner = &value[1..value.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    Some(out)
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => {
                if ["css=", "text=", "role="]
                    .iter()
                    .any(|prefix| selector.starts_with(prefix))
                {
                    write!(f, "css={}", selector)
                } else {
                    f.write_str(selector)
                }
            }
            Locator::Text { text, exact: true } => write!(f, "text=\"{}\"", escape(text)),
            Locator::Text { text, exact: false } => {
                let plain = !text.is_empty()
                    && text.trim() == text
                    && !text.starts_with(['"', '\''])
                    && !text.ends_with(['"', '\'']);
                if plain {
                    write!(f, "text={}", text)
                } else {
                    write!(f, "text=\"{}\"i", escape(text))
                }
            }
            Locator::Role { role, name: None } => write!(f, "role={}", role),
            Locator::Role {
                role,
                name: Some(name),
            } => write!(f, "role={}[name=\"{}\"]", role, escape(name)),
        }
    }
}

impl TryFrom<String> for Locator {
    type Error = CheckError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}
