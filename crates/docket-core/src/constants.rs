//! Shared constants.

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Lifetime of a cached view (GET) URL.
pub const VIEW_URL_TTL_SECS: u64 = 600;

/// Lifetime of an upload (PUT) URL. Upload links are single-use and never cached.
pub const UPLOAD_URL_TTL_SECS: u64 = 60;

/// Reserved category name for per-person profile photos.
pub const PROFILE_PHOTO_CATEGORY: &str = "profile_photo";

/// Fixed object name for profile photos so a re-upload overwrites the previous one.
pub const PROFILE_PHOTO_OBJECT_NAME: &str = "profile";

/// Key prefix used outside production so test objects never mix with real ones.
pub const NON_PRODUCTION_KEY_PREFIX: &str = "test/";
