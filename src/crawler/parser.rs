//! HTML parser for extracting records and links
//!
//! Extraction is driven entirely by [`ExtractConfig`]: an optional item
//! selector splits the page into repeated items, each configured field is
//! read from the item (text or attribute), optionally narrowed by a regex,
//! and converted according to its [`FieldKind`].
//!
//! Links to follow come from the `follow` selector.
//!
//! **Exclude:**
//! - `<a href="..." download>`
//! - `javascript:`, `mailto:`, `tel:` links
//! - Data URIs and fragment-only anchors

use crate::config::{ExtractConfig, FieldKind, FieldRule};
use crate::crawler::fetcher::{FetchError, FetchedPage};
use crate::output::Record;
use crate::ConfigError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Records and links pulled out of one page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub records: Vec<Record>,

    /// Absolute HTTP(S) URLs, in document order, not yet normalized
    pub links: Vec<String>,
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    selector: Option<Selector>,
    attribute: Option<String>,
    text_fallback: bool,
    pattern: Option<Regex>,
    kind: FieldKind,
    required: bool,
}

/// Compiled extraction rules, shared read-only by the result processor
#[derive(Debug)]
pub struct PageParser {
    item: Option<Selector>,
    follow: Selector,
    fields: Vec<CompiledField>,
}

fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

impl PageParser {
    pub fn new(config: &ExtractConfig) -> Result<Self, ConfigError> {
        let item = config.item.as_deref().map(compile_selector).transpose()?;
        let follow = compile_selector(&config.follow)?;
        let fields = config
            .fields
            .iter()
            .map(compile_field)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            item,
            follow,
            fields,
        })
    }

    /// Parser that only follows `a[href]` links and extracts nothing
    pub fn links_only() -> Result<Self, ConfigError> {
        Self::new(&ExtractConfig::default())
    }

    /// Parses a fetched page
    ///
    /// Pages that are not HTML fail with [`FetchError::Parse`].
    pub fn parse_page(&self, page: &FetchedPage) -> Result<ParsedPage, FetchError> {
        if let Some(content_type) = &page.content_type {
            if !is_html(content_type) {
                return Err(FetchError::Parse(format!(
                    "unsupported content type: {}",
                    content_type
                )));
            }
        }

        let document = Html::parse_document(&page.body);
        let base_url = &page.final_url;

        Ok(ParsedPage {
            records: self.extract_records(&document, base_url),
            links: self.extract_links(&document, base_url),
        })
    }

    fn extract_records(&self, document: &Html, base_url: &Url) -> Vec<Record> {
        if self.fields.is_empty() {
            return Vec::new();
        }

        match &self.item {
            Some(item) => document
                .select(item)
                .filter_map(|element| self.extract_record(element, base_url))
                .collect(),
            None => self
                .extract_record(document.root_element(), base_url)
                .into_iter()
                .collect(),
        }
    }

    /// Builds one record; `None` when a required field is missing
    fn extract_record(&self, scope: ElementRef<'_>, base_url: &Url) -> Option<Record> {
        let mut fields = BTreeMap::new();

        for field in &self.fields {
            let value = extract_field(field, scope, base_url);
            if value.is_none() && field.required {
                return None;
            }
            fields.insert(field.name.clone(), value.unwrap_or(Value::Null));
        }

        Some(Record {
            source_url: base_url.to_string(),
            fields,
        })
    }

    fn extract_links(&self, document: &Html, base_url: &Url) -> Vec<String> {
        document
            .select(&self.follow)
            .filter(|element| element.value().attr("download").is_none())
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_link(href, base_url))
            .collect()
    }
}

fn compile_field(rule: &FieldRule) -> Result<CompiledField, ConfigError> {
    let selector = rule.selector.as_deref().map(compile_selector).transpose()?;
    let pattern = rule
        .pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| {
            ConfigError::Validation(format!("Invalid pattern for field '{}': {}", rule.name, e))
        })?;

    Ok(CompiledField {
        name: rule.name.clone(),
        selector,
        attribute: rule.attribute.clone(),
        text_fallback: rule.text_fallback,
        pattern,
        kind: rule.kind,
        required: rule.required,
    })
}

fn extract_field(field: &CompiledField, scope: ElementRef<'_>, base_url: &Url) -> Option<Value> {
    let element = match &field.selector {
        Some(selector) => scope.select(selector).next()?,
        None => scope,
    };

    let text = || collapse_whitespace(&element.text().collect::<String>());
    let raw = match &field.attribute {
        Some(attribute) => match element.value().attr(attribute) {
            Some(value) => value.trim().to_string(),
            None if field.text_fallback => text(),
            None => return None,
        },
        None => text(),
    };

    let raw = match &field.pattern {
        Some(pattern) => {
            let captures = pattern.captures(&raw)?;
            captures.get(1).or_else(|| captures.get(0))?.as_str().to_string()
        }
        None => raw,
    };

    if raw.is_empty() {
        return None;
    }

    match field.kind {
        FieldKind::Text => Some(Value::String(raw)),
        FieldKind::Url => base_url
            .join(&raw)
            .ok()
            .map(|url| Value::String(url.to_string())),
        FieldKind::Number => parse_number(&raw).map(Value::from),
    }
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads the first run of digits and commas as an integer, commas ignored
///
/// `"£1,234.50"` yields `1234`.
pub fn parse_number(text: &str) -> Option<i64> {
    let start = text.find(|c: char| c.is_ascii_digit() || c == ',')?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url.to_string()),
        _ => None,
    }
}
