//! Request plumbing shared by the resource routers: buffered multipart
//! forms and feed cursors.

use std::collections::HashMap;

use axum::extract::Multipart;
use chrono::DateTime;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::requests::sniff_image;
use crate::storage::MediaUpload;

/// A multipart body read fully into memory.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: Vec<(String, MediaUpload)>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await? {
            let name = base_name(field.name().unwrap_or_default()).to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let declared = field.content_type().map(str::to_string);
                    let data = field.bytes().await?;
                    let mime = match (sniff_image(&data), declared) {
                        (Some(sniffed), _) => sniffed.to_string(),
                        (None, Some(declared)) => declared,
                        (None, None) => mime_guess::from_path(&file_name)
                            .first_or_octet_stream()
                            .to_string(),
                    };
                    // Browsers send an empty part for an untouched file input
                    if file_name.is_empty() && data.is_empty() {
                        continue;
                    }
                    form.files.push((
                        name,
                        MediaUpload {
                            file_name: Some(file_name),
                            mime,
                            data,
                        },
                    ));
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// Trimmed text field. Blank values count as absent.
    pub fn text(&mut self, name: &str) -> Option<String> {
        self.fields
            .remove(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Trimmed text field, keeping blank values so they can fail validation.
    pub fn raw_text(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name).map(|v| v.trim().to_string())
    }

    /// All files submitted under `name` (`name`, `name[]` or `name[i]`).
    pub fn take_files(&mut self, name: &str) -> Vec<MediaUpload> {
        let (taken, rest) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        taken.into_iter().map(|(_, upload)| upload).collect()
    }
}

/// `media[]` and `media[3]` both name the `media` field.
fn base_name(name: &str) -> &str {
    match name.find('[') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    /// Epoch millis or an RFC 3339 timestamp.
    pub before: Option<String>,
    pub limit: Option<String>,
}

impl FeedParams {
    pub fn limit(&self) -> AppResult<Option<u32>> {
        match self.limit.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("Invalid limit: {}", raw))),
        }
    }

    pub fn before_millis(&self) -> AppResult<Option<i64>> {
        let Some(raw) = self.before.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(millis) = raw.parse::<i64>() {
            return Ok(Some(millis));
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(|_| AppError::BadRequest(format!("Invalid cursor: {}", raw)))
    }
}
