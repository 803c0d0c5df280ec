//! HTML email templates loaded from disk.
//!
//! Placeholders are written `{{Key}}`; values are HTML-escaped on
//! substitution and unknown keys render as an empty string.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::MailError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    Welcome,
}

impl Template {
    pub const ALL: [Template; 1] = [Template::Welcome];

    pub fn name(self) -> &'static str {
        match self {
            Template::Welcome => "welcome",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample values used by the preview route.
pub fn preview_data(template: Template) -> BTreeMap<String, String> {
    match template {
        Template::Welcome => BTreeMap::from([("UserFirstName".to_string(), "John".to_string())]),
    }
}

/// Directory holding `{name}.html` files.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, template: Template) -> PathBuf {
        self.dir.join(format!("{}.html", template.name()))
    }

    pub async fn render(
        &self,
        template: Template,
        data: &BTreeMap<String, String>,
    ) -> Result<String, MailError> {
        let path = self.path(template);
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MailError::Template {
                name: template.name(),
                path: path.clone(),
                source,
            })?;
        Ok(fill(&source, data))
    }
}

/// Substitute `{{Key}}` placeholders in `source`.
pub fn fill(source: &str, data: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = rest[start + 2..start + 2 + len].trim();
        if let Some(value) = data.get(key) {
            out.push_str(&escape_html(value));
        }
        rest = &rest[start + 2 + len + 2..];
    }
    out.push_str(rest);
    out
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
