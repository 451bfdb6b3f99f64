mod errors;
mod profile;
mod relay;
mod scheduler;
mod store;
mod task;
mod traits;
mod types;

pub use errors::{DavError, Result};
pub use profile::{normalize_folder, ProfileMetadata, ServerProfile};
pub use relay::{NotificationRelay, SurfaceRegistry};
pub use scheduler::{CountdownScheduler, SchedulerHandle};
pub use store::{FileProfileStore, MetadataMirror, TieredProfileStore};
pub use task::PendingUpload;
pub use traits::{NotificationSink, ProfileStore, Uploader};
pub use types::{FolderProbeResult, SurfaceRef, UploadEvent, UploadId, UploadOutcome, UploadState};
