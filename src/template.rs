//! Query templates and parameter binding.
//!
//! A template is SQL text with `{name}` placeholders. The text is scanned
//! once when the template is built; binding is then a single left-to-right
//! pass over the scanned segments. `{{` and `}}` stand for literal braces.
//!
//! Values are substituted as literal SQL text, not bound at the protocol
//! level. Text values have their single quotes doubled so they cannot close
//! the quoted literal they are placed in, but templates are expected to come
//! from trusted configuration; `Param::Raw` is emitted verbatim.

use crate::db::BackendKind;
use crate::error::{Result, TallyError};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

/// Parameter values keyed by placeholder name.
pub type Params = BTreeMap<String, Param>;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Float(f64),
    /// Text placed inside a quoted literal by the template.
    Text(String),
    /// Rendered as ISO-8601 `YYYY-MM-DD`.
    Date(NaiveDate),
    /// Trusted identifier or fragment, emitted verbatim.
    Raw(String),
}

impl Param {
    /// Types a string the way a caller would most likely mean it: integers,
    /// decimals and ISO dates are recognized, anything else is text.
    ///
    /// A typed value is only chosen when it renders back to exactly `s`, so
    /// `007`, `+5` or `2019-1-5` stay text. Snapshot identifiers such as
    /// `2019-11` stay text too.
    pub fn infer(s: &str) -> Self {
        let candidate = if let Ok(i) = s.parse::<i64>() {
            Some(Self::Int(i))
        } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Some(Self::Date(date))
        } else if s.contains('.')
            && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        {
            s.parse::<f64>().ok().map(Self::Float)
        } else {
            None
        };

        match candidate {
            Some(typed) if typed.render() == s => typed,
            _ => Self::Text(s.to_string()),
        }
    }

    /// Renders the value as SQL text.
    pub fn render(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.replace('\'', "''"),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Raw(s) => s.clone(),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) | Self::Raw(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Param {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

/// Builds a `Params` map from `(name, value)` pairs.
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<Param>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("valid token regex"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits template text into literal and placeholder segments.
fn scan(name: &str, text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut last = 0;

    for caps in token_regex().captures_iter(text) {
        let Some(token) = caps.get(0) else { continue };
        literal.push_str(&text[last..token.start()]);
        last = token.end();

        match token.as_str() {
            "{{" => literal.push('{'),
            "}}" => literal.push('}'),
            "{" | "}" => {
                return Err(TallyError::invalid_template(
                    name,
                    format!("unmatched '{}' at byte {}", token.as_str(), token.start()),
                ))
            }
            _ => {
                let placeholder = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if !is_identifier(placeholder) {
                    return Err(TallyError::invalid_template(
                        name,
                        format!(
                            "'{}' is not a valid placeholder; write literal braces as '{{{{' and '}}}}'",
                            token.as_str()
                        ),
                    ));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(placeholder.to_string()));
            }
        }
    }

    literal.push_str(&text[last..]);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// A named SQL template.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    name: String,
    text: String,
    backend: BackendKind,
    description: Option<String>,
    segments: Vec<Segment>,
    required: BTreeSet<String>,
}

impl QueryTemplate {
    /// Builds a template, scanning `text` for placeholders.
    pub fn new(name: impl Into<String>, text: impl Into<String>, backend: BackendKind) -> Result<Self> {
        let name = name.into();
        let text = text.into();
        if name.trim().is_empty() {
            return Err(TallyError::invalid_template(name, "template name is empty"));
        }

        let segments = scan(&name, &text)?;
        let required = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(p) => Some(p.clone()),
                Segment::Literal(_) => None,
            })
            .collect();

        Ok(Self {
            name,
            text,
            backend,
            description: None,
            segments,
            required,
        })
    }

    /// Attaches a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The templated SQL as written.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Names of every placeholder in the text.
    pub fn required_parameters(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Substitutes `params` into the template.
    ///
    /// Fails with `MissingParameter` naming every placeholder without a
    /// value. Supplied parameters the text never references are recorded on
    /// the bound query rather than rejected.
    pub fn bind(&self, params: &Params) -> Result<BoundQuery> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| !params.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TallyError::MissingParameter {
                template: self.name.clone(),
                missing,
            });
        }

        let mut sql = String::with_capacity(self.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => sql.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        TallyError::internal(format!("parameter '{name}' vanished during bind"))
                    })?;
                    sql.push_str(&value.render());
                }
            }
        }

        let unused_parameters = params
            .keys()
            .filter(|name| !self.required.contains(*name))
            .cloned()
            .collect();

        Ok(BoundQuery {
            template: self.name.clone(),
            sql_text: sql,
            backend: self.backend,
            parameters: params.clone(),
            unused_parameters,
        })
    }
}

/// A template with every placeholder filled in. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    template: String,
    sql_text: String,
    backend: BackendKind,
    parameters: Params,
    unused_parameters: Vec<String>,
}

impl BoundQuery {
    /// Name of the template this query was bound from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The final literal SQL.
    pub fn sql_text(&self) -> &str {
        &self.sql_text
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    pub fn unused_parameters(&self) -> &[String] {
        &self.unused_parameters
    }

    /// Describes the query for error messages: template name plus the
    /// parameter values it was bound with.
    pub fn context(&self) -> String {
        let values: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("template '{}' ({})", self.template, values.join(", "))
    }
}
