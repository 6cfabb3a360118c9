use crate::config::Config;
use crate::error::AppError;
use crate::models::Category;

const IMAGES: &str = "image/*";

/// Reasons an upload request is rejected before any quota or signing work
#[derive(Debug, thiserror::Error)]
pub enum UploadValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid content type for {category}: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        category: String,
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Empty file")]
    EmptyFile,
}

impl From<UploadValidationError> for AppError {
    fn from(err: UploadValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Per-category upload limits.
///
/// Profile photos accept images only. General document categories accept images
/// plus the configured list, where a `type/*` entry matches any subtype.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    max_profile_photo_bytes: u64,
    max_document_bytes: u64,
    document_content_types: Vec<String>,
}

impl UploadPolicy {
    pub fn new(
        max_profile_photo_bytes: u64,
        max_document_bytes: u64,
        document_content_types: Vec<String>,
    ) -> Self {
        let mut types: Vec<String> = document_content_types
            .into_iter()
            .map(|ct| ct.trim().to_lowercase())
            .filter(|ct| !ct.is_empty())
            .collect();
        if !types.iter().any(|ct| ct == IMAGES) {
            types.insert(0, IMAGES.to_string());
        }

        Self {
            max_profile_photo_bytes,
            max_document_bytes,
            document_content_types: types,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_profile_photo_size_bytes(),
            config.max_document_size_bytes(),
            config.document_allowed_content_types().to_vec(),
        )
    }

    pub fn max_size_for(&self, category: &Category) -> u64 {
        if category.is_profile_photo() {
            self.max_profile_photo_bytes
        } else {
            self.max_document_bytes
        }
    }

    pub fn allowed_content_types_for(&self, category: &Category) -> Vec<String> {
        if category.is_profile_photo() {
            vec![IMAGES.to_string()]
        } else {
            self.document_content_types.clone()
        }
    }

    pub fn validate_content_type(
        &self,
        category: &Category,
        content_type: &str,
    ) -> Result<(), UploadValidationError> {
        // Parameters such as "; charset=binary" do not affect the media type.
        let normalized = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        let allowed = self.allowed_content_types_for(category);
        if !allowed.iter().any(|pattern| content_type_matches(pattern, &normalized)) {
            return Err(UploadValidationError::InvalidContentType {
                category: category.to_string(),
                content_type: content_type.to_string(),
                allowed,
            });
        }

        Ok(())
    }

    pub fn validate_size(&self, category: &Category, size: u64) -> Result<(), UploadValidationError> {
        if size == 0 {
            return Err(UploadValidationError::EmptyFile);
        }

        let max = self.max_size_for(category);
        if size > max {
            return Err(UploadValidationError::FileTooLarge { size, max });
        }

        Ok(())
    }

    pub fn validate(
        &self,
        category: &Category,
        content_type: &str,
        size: u64,
    ) -> Result<(), UploadValidationError> {
        self.validate_content_type(category, content_type)?;
        self.validate_size(category, size)
    }
}

fn content_type_matches(pattern: &str, content_type: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(top_level) => content_type
            .split_once('/')
            .is_some_and(|(ty, sub)| ty == top_level && !sub.is_empty()),
        None => pattern == content_type,
    }
}

/// Converts a caller-supplied index into a slot index.
pub fn parse_slot_index(raw: i64) -> Result<usize, AppError> {
    usize::try_from(raw)
        .map_err(|_| AppError::Index(format!("Slot index must be non-negative, got {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIB;

    fn policy() -> UploadPolicy {
        UploadPolicy::new(
            MIB,
            50 * MIB,
            vec!["image/*".to_string(), "application/pdf".to_string()],
        )
    }

    fn certificates() -> Category {
        Category::document("certificates").unwrap()
    }

    #[test]
    fn images_allowed_everywhere() {
        let policy = policy();
        assert!(policy
            .validate_content_type(&Category::ProfilePhoto, "image/png")
            .is_ok());
        assert!(policy
            .validate_content_type(&certificates(), "IMAGE/JPEG")
            .is_ok());
    }

    #[test]
    fn documents_accept_images_whatever_the_configured_list() {
        let policy = UploadPolicy::new(MIB, 50 * MIB, vec!["application/pdf".to_string()]);
        assert!(policy
            .validate_content_type(&certificates(), "image/png")
            .is_ok());
        assert_eq!(
            policy.allowed_content_types_for(&certificates()),
            vec!["image/*".to_string(), "application/pdf".to_string()]
        );

        let policy = UploadPolicy::new(MIB, 50 * MIB, Vec::new());
        assert!(policy
            .validate_content_type(&certificates(), "image/webp")
            .is_ok());
        assert!(policy
            .validate_content_type(&certificates(), "application/pdf")
            .is_err());
    }

    #[test]
    fn pdf_only_for_documents() {
        let policy = policy();
        assert!(policy
            .validate_content_type(&certificates(), "application/pdf")
            .is_ok());
        assert!(matches!(
            policy.validate_content_type(&Category::ProfilePhoto, "application/pdf"),
            Err(UploadValidationError::InvalidContentType { .. })
        ));
        assert!(policy
            .validate_content_type(&certificates(), "application/zip")
            .is_err());
        assert!(policy.validate_content_type(&certificates(), "image/").is_err());
    }

    #[test]
    fn size_ceiling_per_category() {
        let policy = policy();
        assert!(policy.validate_size(&Category::ProfilePhoto, MIB).is_ok());
        assert!(matches!(
            policy.validate_size(&Category::ProfilePhoto, MIB + 1),
            Err(UploadValidationError::FileTooLarge { .. })
        ));
        assert!(policy.validate_size(&certificates(), 50 * MIB).is_ok());
        assert!(policy.validate_size(&certificates(), 50 * MIB + 1).is_err());
        assert!(matches!(
            policy.validate_size(&certificates(), 0),
            Err(UploadValidationError::EmptyFile)
        ));
    }

    #[test]
    fn negative_index_is_index_error() {
        assert_eq!(parse_slot_index(3).unwrap(), 3);
        assert!(matches!(parse_slot_index(-1), Err(AppError::Index(_))));
    }
}
