//! Collection scoping: document categories and per-person owner references.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::PROFILE_PHOTO_CATEGORY;
use crate::error::AppError;

static CATEGORY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid category pattern"));

static OWNER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid owner id pattern"));

/// Kind of document a collection holds.
///
/// Profile photos are images only with a small size ceiling; every other
/// category is a named general document bucket (certificates, ID cards, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    ProfilePhoto,
    Document(String),
}

impl Category {
    /// Builds a general document category, rejecting unsafe or reserved names.
    pub fn document(name: impl Into<String>) -> Result<Self, AppError> {
        let name = name.into();
        if name == PROFILE_PHOTO_CATEGORY {
            return Err(AppError::Validation(format!(
                "Category name '{}' is reserved",
                name
            )));
        }
        if !CATEGORY_NAME.is_match(&name) {
            return Err(AppError::Validation(format!(
                "Invalid category name '{}': use 1-64 letters, digits, '_' or '-'",
                name
            )));
        }
        Ok(Category::Document(name))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::ProfilePhoto => PROFILE_PHOTO_CATEGORY,
            Category::Document(name) => name,
        }
    }

    pub fn is_profile_photo(&self) -> bool {
        matches!(self, Category::ProfilePhoto)
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == PROFILE_PHOTO_CATEGORY {
            Ok(Category::ProfilePhoto)
        } else {
            Category::document(s)
        }
    }
}

impl TryFrom<String> for Category {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// The person a per-person collection belongs to.
///
/// Rendered as `S_{id}` / `T_{id}`, which is also the path segment used in
/// storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OwnerRef {
    Student(String),
    Teacher(String),
}

impl OwnerRef {
    pub fn student(id: impl Into<String>) -> Result<Self, AppError> {
        let id = validate_owner_id(id.into())?;
        Ok(OwnerRef::Student(id))
    }

    pub fn teacher(id: impl Into<String>) -> Result<Self, AppError> {
        let id = validate_owner_id(id.into())?;
        Ok(OwnerRef::Teacher(id))
    }

    pub fn id(&self) -> &str {
        match self {
            OwnerRef::Student(id) | OwnerRef::Teacher(id) => id,
        }
    }
}

fn validate_owner_id(id: String) -> Result<String, AppError> {
    if OWNER_ID.is_match(&id) {
        Ok(id)
    } else {
        Err(AppError::Validation(format!("Invalid owner id '{}'", id)))
    }
}

impl FromStr for OwnerRef {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("S_") {
            OwnerRef::student(id)
        } else if let Some(id) = s.strip_prefix("T_") {
            OwnerRef::teacher(id)
        } else {
            Err(AppError::Validation(format!(
                "Invalid owner reference '{}': expected S_<id> or T_<id>",
                s
            )))
        }
    }
}

impl TryFrom<String> for OwnerRef {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OwnerRef> for String {
    fn from(owner: OwnerRef) -> Self {
        owner.to_string()
    }
}

impl Display for OwnerRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OwnerRef::Student(id) => write!(f, "S_{}", id),
            OwnerRef::Teacher(id) => write!(f, "T_{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_photo_name_is_reserved() {
        assert_eq!(
            "profile_photo".parse::<Category>().unwrap(),
            Category::ProfilePhoto
        );
        assert!(Category::document("profile_photo").is_err());
    }

    #[test]
    fn document_names_are_restricted() {
        assert!(Category::document("certificates").is_ok());
        assert!(Category::document("id-card_2").is_ok());
        assert!(Category::document("").is_err());
        assert!(Category::document("../etc").is_err());
        assert!(Category::document("a".repeat(65)).is_err());
    }

    #[test]
    fn owner_ref_renders_and_parses() {
        let owner = OwnerRef::student("42").unwrap();
        assert_eq!(owner.to_string(), "S_42");
        assert_eq!("S_42".parse::<OwnerRef>().unwrap(), owner);
        assert_eq!(
            "T_7".parse::<OwnerRef>().unwrap(),
            OwnerRef::Teacher("7".to_string())
        );
        assert!("X_7".parse::<OwnerRef>().is_err());
        assert!("S_a/b".parse::<OwnerRef>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&OwnerRef::teacher("9").unwrap()).unwrap();
        assert_eq!(json, "\"T_9\"");
        let category: Category = serde_json::from_str("\"certificates\"").unwrap();
        assert_eq!(category.as_str(), "certificates");
        assert!(serde_json::from_str::<Category>("\"bad name\"").is_err());
    }
}
