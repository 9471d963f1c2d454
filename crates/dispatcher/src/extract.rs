//! Content and image extraction from completion payloads
//!
//! Pure functions over the raw JSON of a successful response. Every field is
//! optional: a payload without choices, content or images yields `None` or an
//! empty list, never an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/[^;]+;base64,[A-Za-z0-9+/=]+").expect("data URL pattern is valid")
});

/// An image returned by the model, either inline or by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "url", rename_all = "snake_case")]
pub enum ImageSource {
    /// `data:image/...;base64,...` URL
    Base64(String),
    /// Remote URL
    Url(String),
}

impl ImageSource {
    fn from_url(url: &str) -> Self {
        if url.starts_with("data:image") {
            ImageSource::Base64(url.to_string())
        } else {
            ImageSource::Url(url.to_string())
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ImageSource::Base64(u) | ImageSource::Url(u) => u,
        }
    }
}

fn first_message(payload: &Value) -> Option<&Value> {
    payload.pointer("/choices/0/message")
}

/// Text of the first choice's message.
///
/// Handles both a plain string and an array of `{"type":"text"}` parts
/// (joined with newlines).
pub fn extract_content(payload: &Value) -> Option<String> {
    match first_message(payload)?.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

/// Images from the first choice's message.
///
/// Collects `message.images[].image_url.url` entries first, then any base64
/// data URLs embedded in the text content. Duplicates are dropped.
pub fn extract_images(payload: &Value) -> Vec<ImageSource> {
    let Some(message) = first_message(payload) else {
        return Vec::new();
    };

    let mut images: Vec<ImageSource> = message
        .get("images")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|img| img.pointer("/image_url/url").and_then(Value::as_str))
        .map(ImageSource::from_url)
        .collect();

    if let Some(content) = extract_content(payload)
        && content.contains("data:image")
    {
        for found in DATA_URL.find_iter(&content) {
            let image = ImageSource::Base64(found.as_str().to_string());
            if !images.contains(&image) {
                images.push(image);
            }
        }
    }

    images
}
