//! Request schemas. Each field carries its constraint; handlers validate a
//! request before any write happens.

use serde::Deserialize;
use validator::Validate;

use crate::error::{AppResult, ValidationFailure};
use crate::storage::MediaUpload;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "The name must be between 1 and 255 characters."))]
    pub name: String,
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: String,
    #[validate(length(min = 8, max = 255, message = "The password must be at least 8 characters."))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: String,
    #[validate(length(min = 1, message = "The password field is required."))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentRequest {
    pub post_id: i64,
    #[serde(alias = "description")]
    #[validate(length(min = 1, max = 1000, message = "The content must be between 1 and 1000 characters."))]
    pub content: String,
    pub parent_id: Option<i64>,
}

/// Text fields of a post submitted as multipart form data.
#[derive(Debug, Default, Validate)]
pub struct PostForm {
    #[validate(length(min = 1, max = 2000, message = "The content must be between 1 and 2000 characters."))]
    pub content: Option<String>,
    #[validate(url(message = "The video url format is invalid."))]
    pub video_url: Option<String>,
}

#[derive(Debug, Default, Validate)]
pub struct ProfileForm {
    #[validate(length(min = 1, max = 255, message = "The name must be between 1 and 255 characters."))]
    pub name: Option<String>,
    #[validate(length(max = 1000, message = "The bio may not be greater than 1000 characters."))]
    pub bio: Option<String>,
}

/// Trim a text field the way form input is normalised before validation.
pub fn trimmed(value: String) -> String {
    value.trim().to_string()
}

/// Run the derived field checks and map them into the API error shape.
pub fn validate<T: Validate>(request: &T) -> AppResult<()> {
    request.validate()?;
    Ok(())
}

/// Image type named by the leading signature bytes, if any.
pub fn sniff_image(data: &[u8]) -> Option<&'static str> {
    const SIGNATURES: [(&[u8], &str); 3] = [
        (&[0x89, 0x50, 0x4E, 0x47], "image/png"),
        (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
        (&[0x47, 0x49, 0x46, 0x38], "image/gif"),
    ];
    SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Limits applied to uploaded images. The type is taken from the file
/// content; the declared content type is not trusted.
#[derive(Debug, Clone, Copy)]
pub struct MediaRules {
    pub max_files: usize,
    pub max_bytes: usize,
    pub mimes: &'static [&'static str],
}

pub const IMAGE_RULES: MediaRules = MediaRules {
    max_files: 5,
    max_bytes: 1512 * 1024,
    mimes: &["image/jpeg", "image/png", "image/gif"],
};

pub const AVATAR_RULES: MediaRules = MediaRules {
    max_files: 1,
    ..IMAGE_RULES
};

impl MediaRules {
    pub fn check(&self, field: &str, uploads: &[MediaUpload]) -> ValidationFailure {
        let mut failure = ValidationFailure::default();
        if uploads.len() > self.max_files {
            failure.add(
                field,
                format!("The {} may not have more than {} items.", field, self.max_files),
            );
        }
        for (idx, upload) in uploads.iter().enumerate() {
            let key = format!("{}.{}", field, idx);
            let accepted = sniff_image(&upload.data).is_some_and(|mime| self.mimes.contains(&mime));
            if !accepted {
                failure.add(
                    key.clone(),
                    format!("The {} must be a file of type: jpeg, jpg, png, gif.", key),
                );
            }
            if upload.size() > self.max_bytes {
                failure.add(
                    key.clone(),
                    format!(
                        "The {} may not be greater than {} kilobytes.",
                        key,
                        self.max_bytes / 1024
                    ),
                );
            }
        }
        failure
    }
}
