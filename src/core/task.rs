use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use super::profile::ServerProfile;
use super::types::{SurfaceRef, UploadId, UploadState};

/// 已结束的 id 保留多久，过期后 `state()` 返回 `None`
pub const SETTLED_RETENTION: Duration = Duration::from_secs(10 * 60);

/// 等待倒计时结束的上传
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub id: UploadId,
    /// 调度时按值捕获，之后对配置的修改不影响本次上传
    pub profile: ServerProfile,
    pub image_url: String,
    pub page_url: String,
    pub surface: SurfaceRef,
    pub scheduled_at: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
}

impl PendingUpload {
    pub fn new(
        id: UploadId,
        profile: ServerProfile,
        image_url: String,
        page_url: String,
        surface: SurfaceRef,
        delay: Duration,
    ) -> Self {
        let scheduled_at = Utc::now();
        let fire_at = scheduled_at + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        Self { id, profile, image_url, page_url, surface, scheduled_at, fire_at }
    }

    /// 从调度到现在经过的毫秒数
    pub fn waited_ms(&self) -> i64 {
        (Utc::now() - self.scheduled_at).num_milliseconds()
    }
}

struct PendingEntry {
    upload: PendingUpload,
    timer: CancellationToken,
}

/// 倒计时表
///
/// 只由调度器的 worker 持有。条目只能被取出一次，
/// 取出即完成 `Scheduled -> Fired | Cancelled` 的转换。
/// 结束的 id 只保留 `SETTLED_RETENTION`，之后彻底退役。
#[derive(Default)]
pub struct PendingTable {
    pending: HashMap<UploadId, PendingEntry>,
    settled: HashMap<UploadId, UploadState>,
    /// 按结束时间排序，用于退役
    settled_order: VecDeque<(Instant, UploadId)>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, upload: PendingUpload, timer: CancellationToken) {
        self.pending.insert(upload.id.clone(), PendingEntry { upload, timer });
    }

    /// 定时器到期：仍在表中才返回
    pub fn take_for_fire(&mut self, id: &UploadId) -> Option<PendingUpload> {
        self.settle(id, UploadState::Fired)
    }

    /// 取消：停掉定时器并移除
    pub fn take_for_cancel(&mut self, id: &UploadId) -> Option<PendingUpload> {
        self.settle(id, UploadState::Cancelled)
    }

    fn settle(&mut self, id: &UploadId, next: UploadState) -> Option<PendingUpload> {
        if !UploadState::Scheduled.can_transition_to(next) {
            return None;
        }

        let entry = self.pending.remove(id)?;
        entry.timer.cancel();
        self.settled.insert(id.clone(), next);
        self.settled_order.push_back((Instant::now(), id.clone()));
        Some(entry.upload)
    }

    /// 关闭时取消所有倒计时
    pub fn drain(&mut self) -> Vec<PendingUpload> {
        let ids: Vec<UploadId> = self.pending.keys().cloned().collect();
        ids.iter()
            .filter_map(|id| self.take_for_cancel(id))
            .collect()
    }

    /// 退役结束超过保留期的 id，返回退役数量
    pub fn retire_expired(&mut self, now: Instant) -> usize {
        let mut retired = 0;
        while let Some((settled_at, _)) = self.settled_order.front() {
            if now.saturating_duration_since(*settled_at) < SETTLED_RETENTION {
                break;
            }
            if let Some((_, id)) = self.settled_order.pop_front() {
                self.settled.remove(&id);
                retired += 1;
            }
        }
        retired
    }

    /// 倒计时中、或在保留期内结束的 id 才有状态
    pub fn state(&self, id: &UploadId) -> Option<UploadState> {
        if self.pending.contains_key(id) {
            return Some(UploadState::Scheduled);
        }
        self.settled.get(id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 仍记录着的 id 数（倒计时中 + 保留期内已结束）
    pub fn tracked_count(&self) -> usize {
        self.pending.len() + self.settled.len()
    }
}
