mod client;
mod executor;
pub mod filename;
mod prober;
pub mod url;

pub use client::{FetchedImage, WebDavClient, DEFAULT_CONTENT_TYPE};
pub use executor::WebDavUploader;
pub use filename::derive_filename;
pub use prober::{parse_folder_listing, FolderProber, LIMITED_LISTING_NOTE};
pub use url::build_target_url;
