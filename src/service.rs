use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use crate::core::{
    CountdownScheduler, DavError, FolderProbeResult, NotificationRelay, NotificationSink,
    ProfileStore, Result, SchedulerHandle, SurfaceRef, UploadEvent, UploadId, Uploader,
};
use crate::webdav::{FolderProber, WebDavClient, WebDavUploader};

/// 默认倒计时秒数
pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(5);

/// 界面发给核心的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum CoreMessage {
    ScheduleUpload {
        profile_id: String,
        image_url: String,
        page_url: String,
        surface: SurfaceRef,
    },
    CancelUpload {
        upload_id: UploadId,
    },
    TestConnection {
        url: String,
        username: String,
        password: String,
    },
    ConfigChanged,
}

/// 核心对消息的回复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "camelCase")]
pub enum CoreReply {
    Scheduled { upload_id: UploadId },
    Rejected { reason: String },
    Ack,
    Probe { result: FolderProbeResult },
}

/// 核心入口
///
/// 不缓存任何配置：每次调度都重新从存储读取。
#[derive(Clone)]
pub struct DavDrop {
    store: Arc<dyn ProfileStore>,
    scheduler: CountdownScheduler,
    prober: FolderProber,
    countdown: Duration,
}

impl DavDrop {
    pub async fn handle(&self, message: CoreMessage) -> CoreReply {
        match message {
            CoreMessage::ScheduleUpload { profile_id, image_url, page_url, surface } => {
                match self.schedule_upload(&profile_id, &image_url, &page_url, surface).await {
                    Ok(upload_id) => CoreReply::Scheduled { upload_id },
                    Err(err) => {
                        warn!(profile_id, "Upload rejected: {}", err);
                        CoreReply::Rejected { reason: err.to_string() }
                    }
                }
            }
            CoreMessage::CancelUpload { upload_id } => {
                self.cancel_upload(&upload_id).await;
                CoreReply::Ack
            }
            CoreMessage::TestConnection { url, username, password } => {
                CoreReply::Probe {
                    result: self.test_connection(&url, &username, &password).await,
                }
            }
            CoreMessage::ConfigChanged => {
                debug!("Configuration changed, next operation re-reads profiles");
                CoreReply::Ack
            }
        }
    }

    /// 读取配置并开始倒计时
    pub async fn schedule_upload(
        &self,
        profile_id: &str,
        image_url: &str,
        page_url: &str,
        surface: SurfaceRef,
    ) -> Result<UploadId> {
        let profile = self.store
            .get(profile_id)
            .await?
            .ok_or_else(|| DavError::configuration(format!("Unknown server profile '{}'", profile_id)))?;
        profile.validate()?;

        let upload_id = self.scheduler
            .schedule(profile, image_url, page_url, surface, self.countdown)
            .await?;

        info!(%upload_id, profile_id, "Upload scheduled");
        Ok(upload_id)
    }

    pub async fn cancel_upload(&self, upload_id: &UploadId) {
        self.scheduler.cancel(upload_id).await;
    }

    pub async fn test_connection(&self, url: &str, username: &str, password: &str) -> FolderProbeResult {
        self.prober.probe(url, username, password).await
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &CountdownScheduler {
        &self.scheduler
    }

    pub fn countdown(&self) -> Duration {
        self.countdown
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.scheduler.subscribe_events()
    }
}

/// 构建器
pub struct DavDropBuilder {
    store: Option<Arc<dyn ProfileStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    uploader: Option<Arc<dyn Uploader>>,
    client: WebDavClient,
    countdown: Duration,
}

impl Default for DavDropBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DavDropBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            sink: None,
            uploader: None,
            client: WebDavClient::new(),
            countdown: DEFAULT_COUNTDOWN,
        }
    }

    pub fn store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 替换默认的 WebDAV 上传器
    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn client(mut self, client: WebDavClient) -> Self {
        self.client = client;
        self
    }

    pub fn countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    /// 启动调度器，返回入口和调度器句柄
    pub fn build(self) -> Result<(DavDrop, SchedulerHandle)> {
        let store = self.store
            .ok_or_else(|| DavError::configuration("A profile store is required"))?;
        let sink = self.sink
            .ok_or_else(|| DavError::configuration("A notification sink is required"))?;
        let uploader = self.uploader
            .unwrap_or_else(|| Arc::new(WebDavUploader::new(self.client.clone())) as Arc<dyn Uploader>);

        let handle = CountdownScheduler::new(uploader, NotificationRelay::new(sink));
        let davdrop = DavDrop {
            store,
            scheduler: handle.scheduler.clone(),
            prober: FolderProber::new(self.client),
            countdown: self.countdown,
        };

        Ok((davdrop, handle))
    }
}
