//! Docket Services Layer
//!
//! Business services over the repositories and the object store: the document
//! ledger, quota accounting, the signed URL cache, upload grants and the
//! confirm/replace/remove workflow that ties them together.

pub mod clock;
pub mod documents;
mod external;
pub mod ledger;
pub mod quota;
pub mod upload_grant;
pub mod url_cache;

pub use clock::{Clock, SystemClock};
pub use documents::DocumentService;
pub use ledger::DocumentLedger;
pub use quota::{QuotaService, ReconcileSummary, UsageReconciler};
pub use upload_grant::UploadGrantService;
pub use url_cache::SignedUrlCache;

pub use docket_storage::{create_storage, Storage, StorageBackend, StorageError, StorageResult};
