use std::str::FromStr;
use std::time::Duration;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::{DavError, Result};
use super::profile::ServerProfile;

/// 上传任务唯一标识
///
/// 格式为 `upload-<epoch-millis>-<8 位随机十六进制>`，可以从字符串还原，
/// 方便界面在取消消息里原样带回。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(String);

impl UploadId {
    pub fn new() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("upload-{}-{}", Utc::now().timestamp_millis(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UploadId {
    type Err = DavError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DavError::Parse("Empty upload id".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

/// 发起请求的界面（浏览器里是标签页）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SurfaceRef(pub String);

impl SurfaceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for SurfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 倒计时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadState {
    /// 倒计时中
    Scheduled,
    /// 倒计时结束，已交给执行器
    Fired,
    /// 已取消
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Fired | UploadState::Cancelled)
    }

    pub fn can_transition_to(&self, next: UploadState) -> bool {
        matches!(
            (self, next),
            (UploadState::Scheduled, UploadState::Fired) | (UploadState::Scheduled, UploadState::Cancelled)
        )
    }
}

/// 一次上传的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadOutcome {
    Success {
        filename: String,
    },
    Failure {
        reason: String,
    },
    Cancelled,
}

impl UploadOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure { reason: reason.into() }
    }

    pub fn into_event(self, upload_id: UploadId) -> UploadEvent {
        match self {
            UploadOutcome::Success { filename } => UploadEvent::Succeeded { upload_id, filename },
            UploadOutcome::Failure { reason } => UploadEvent::Failed { upload_id, reason },
            UploadOutcome::Cancelled => UploadEvent::Cancelled { upload_id },
        }
    }
}

/// 连接测试 / 目录探测结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum FolderProbeResult {
    Success {
        /// 规范化后的绝对路径，根目录 `/` 总在第一位
        folders: Vec<String>,
        /// 降级探测时的提示
        note: Option<String>,
    },
    Failure {
        reason: String,
    },
}

impl FolderProbeResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FolderProbeResult::Success { .. })
    }
}

/// 推送给界面的生命周期事件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadEvent {
    /// 倒计时开始
    Started {
        upload_id: UploadId,
        server_name: String,
        delay_seconds: u64,
    },

    /// 倒计时结束，开始传输
    Uploading {
        upload_id: UploadId,
    },

    /// 已取消
    Cancelled {
        upload_id: UploadId,
    },

    /// 上传成功
    Succeeded {
        upload_id: UploadId,
        filename: String,
    },

    /// 上传失败
    Failed {
        upload_id: UploadId,
        reason: String,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> &UploadId {
        match self {
            UploadEvent::Started { upload_id, .. }
            | UploadEvent::Uploading { upload_id }
            | UploadEvent::Cancelled { upload_id }
            | UploadEvent::Succeeded { upload_id, .. }
            | UploadEvent::Failed { upload_id, .. } => upload_id,
        }
    }

    /// 是否是该任务的最后一个事件
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            UploadEvent::Cancelled { .. } | UploadEvent::Succeeded { .. } | UploadEvent::Failed { .. }
        )
    }
}

/// 调度器命令
pub(crate) enum SchedulerCommand {
    /// 开始倒计时
    Schedule {
        profile: ServerProfile,
        image_url: String,
        page_url: String,
        surface: SurfaceRef,
        delay: Duration,
        reply: oneshot::Sender<UploadId>,
    },

    /// 取消
    Cancel {
        upload_id: UploadId,
        reply: oneshot::Sender<()>,
    },

    /// 定时器到期
    Fire {
        upload_id: UploadId,
    },

    /// 查询状态
    GetState {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadState>>,
    },

    /// 取消全部倒计时并等待进行中的上传结束
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// 静态断言确保类型是 Send的
const _: () = {
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn assert_types() {
        assert_send::<UploadId>();
        assert_send::<UploadEvent>();
        assert_send::<UploadOutcome>();
        assert_send::<SchedulerCommand>();
    }
};
