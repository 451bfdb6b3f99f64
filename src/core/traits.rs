use async_trait::async_trait;
use super::errors::Result;
use super::profile::ServerProfile;
use super::types::{SurfaceRef, UploadEvent, UploadOutcome};

/// 核心上传器 trait - 倒计时结束后由调度器调用
///
/// 实现不能返回错误：所有失败都要折叠成 `UploadOutcome::Failure`。
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, profile: &ServerProfile, image_url: &str, page_url: &str) -> UploadOutcome;
}

/// 事件投递 trait - 把事件送到发起请求的界面
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// 界面不可达时返回错误，由 relay 记录并吞掉
    async fn deliver(&self, surface: &SurfaceRef, event: &UploadEvent) -> Result<()>;
}

/// 服务器配置存储 trait
///
/// 核心只依赖这个接口；每次使用都重新读取，不做缓存。
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// 按 id 读取
    async fn get(&self, id: &str) -> Result<Option<ServerProfile>>;

    /// 按保存顺序列出全部
    async fn list(&self) -> Result<Vec<ServerProfile>>;

    /// 新增或覆盖同 id 的配置
    async fn put(&self, profile: ServerProfile) -> Result<()>;

    /// 删除，返回是否存在
    async fn remove(&self, id: &str) -> Result<bool>;
}
