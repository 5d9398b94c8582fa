use super::ScrapingService;
use crate::storage::{Language, StorageError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();

    static ref EN_HONORIFIC_REGEX: Regex = Regex::new(
        r"(?i)^(?:mr|mrs|ms|dr|hon|rt\.?\s*hon)\.?\s+"
    ).unwrap();

    static ref NE_HONORIFIC_REGEX: Regex = Regex::new(
        r"^(?:श्रीमती|श्री|डा\.|सुश्री)\s*"
    ).unwrap();

    static ref FIELD_LINE_REGEX: Regex = Regex::new(
        r"^\s*([^:]+?)\s*:\s*(.*?)\s*$"
    ).unwrap();
}

/// Rule-based name normalization and field extraction.
#[derive(Default)]
pub struct Scraper;

impl Scraper {
    pub fn new() -> Self {
        Self
    }
}

fn field_key(raw: &str) -> String {
    WHITESPACE_REGEX.replace_all(raw.trim(), "_").to_lowercase()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

pub fn normalize_name(raw_name: &str, language: Language) -> String {
    let collapsed = WHITESPACE_REGEX.replace_all(raw_name.trim(), " ");
    match language {
        Language::En => {
            let stripped = EN_HONORIFIC_REGEX.replace(&collapsed, "");
            stripped.split(' ').map(title_case).collect::<Vec<_>>().join(" ")
        }
        Language::Ne => NE_HONORIFIC_REGEX.replace(&collapsed, "").into_owned(),
    }
}

pub fn extract_fields(source: &str, fields: &[&str]) -> Result<Value, StorageError> {
    if source.trim().is_empty() {
        return Err(StorageError::Invalid("nothing to extract from empty source".to_string()));
    }

    let mut found = Map::new();
    for line in source.lines() {
        if let Some(caps) = FIELD_LINE_REGEX.captures(line) {
            let key = field_key(&caps[1]);
            found.entry(key).or_insert_with(|| Value::String(caps[2].to_string()));
        }
    }

    if fields.is_empty() {
        return Ok(Value::Object(found));
    }

    let mut selected = Map::new();
    for field in fields {
        let key = field_key(field);
        let value = found.remove(&key).unwrap_or(Value::Null);
        selected.insert(key, value);
    }
    Ok(Value::Object(selected))
}

#[async_trait]
impl ScrapingService for Scraper {
    async fn normalize_name(&self, raw_name: &str, language: Language) -> String {
        normalize_name(raw_name, language)
    }

    async fn extract_data(&self, source: &str, fields: &[&str]) -> Result<Value, StorageError> {
        extract_fields(source, fields)
    }
}
