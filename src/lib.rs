pub mod core;
pub mod webdav;
pub mod service;
pub mod config;
pub mod logging;

// 重新导出核心类型
pub use core::{
    DavError,
    Result,
    ServerProfile,
    ProfileMetadata,
    ProfileStore,
    FileProfileStore,
    MetadataMirror,
    TieredProfileStore,
    Uploader,
    NotificationSink,
    SurfaceRegistry,
    UploadId,
    UploadState,
    UploadEvent,
    UploadOutcome,
    FolderProbeResult,
    SurfaceRef,
};

pub use service::{CoreMessage, CoreReply, DavDrop, DavDropBuilder};
pub use webdav::{FolderProber, WebDavClient, WebDavUploader};
