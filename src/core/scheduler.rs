use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use super::errors::{DavError, Result};
use super::profile::ServerProfile;
use super::relay::NotificationRelay;
use super::task::{PendingTable, PendingUpload};
use super::traits::Uploader;
use super::types::{SchedulerCommand, SurfaceRef, UploadEvent, UploadId, UploadState};

/// 倒计时调度器
///
/// 轻量句柄，可以随意 clone；真正的倒计时表只在 worker 任务里。
#[derive(Clone)]
pub struct CountdownScheduler {
    command_tx: mpsc::Sender<SchedulerCommand>,
    relay: NotificationRelay,
}

/// 调度器句柄 - 包含调度器和工作任务
pub struct SchedulerHandle {
    pub scheduler: CountdownScheduler,
    pub worker_handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// 取消所有倒计时，等进行中的上传报告结果后退出
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.shutdown().await?;
        self.worker_handle.await
            .map_err(|err| DavError::internal(format!("Worker panic: {}", err)))
    }
}

impl CountdownScheduler {
    pub fn new(uploader: Arc<dyn Uploader>, relay: NotificationRelay) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);

        // 定时器只持有弱引用，所有句柄释放后 worker 自然退出
        let worker = SchedulerWorker {
            uploader,
            relay: relay.clone(),
            table: PendingTable::new(),
            in_flight: JoinSet::new(),
            timer_tx: command_tx.downgrade(),
        };
        let worker_handle = tokio::spawn(worker.run(command_rx));

        SchedulerHandle {
            scheduler: Self { command_tx, relay },
            worker_handle,
        }
    }

    /// Start a countdown, returns the new upload id
    pub async fn schedule(
        &self,
        profile: ServerProfile,
        image_url: impl Into<String>,
        page_url: impl Into<String>,
        surface: SurfaceRef,
        delay: Duration,
    ) -> Result<UploadId> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::Schedule {
                profile,
                image_url: image_url.into(),
                page_url: page_url.into(),
                surface,
                delay,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DavError::SchedulerShutdown)?;

        reply_rx.await.map_err(|_| DavError::SchedulerShutdown)
    }

    /// Cancel a countdown
    ///
    /// 未知、已触发或已取消的 id 都是空操作；调度器已关闭也不报错。
    pub async fn cancel(&self, upload_id: &UploadId) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.command_tx
            .send(SchedulerCommand::Cancel {
                upload_id: upload_id.clone(),
                reply: reply_tx,
            })
            .await;

        if sent.is_ok() {
            let _ = reply_rx.await;
        }
    }

    pub async fn state(&self, upload_id: &UploadId) -> Result<Option<UploadState>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::GetState {
                upload_id: upload_id.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| DavError::SchedulerShutdown)?;

        reply_rx.await.map_err(|_| DavError::SchedulerShutdown)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| DavError::SchedulerShutdown)?;

        reply_rx.await.map_err(|_| DavError::SchedulerShutdown)
    }

    /// 订阅所有上传的事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.relay.subscribe()
    }

    /// 模拟定时器到期
    #[cfg(test)]
    pub(crate) async fn fire_now(&self, upload_id: &UploadId) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::Fire { upload_id: upload_id.clone() })
            .await
            .map_err(|_| DavError::SchedulerShutdown)
    }
}

struct SchedulerWorker {
    uploader: Arc<dyn Uploader>,
    relay: NotificationRelay,
    table: PendingTable,
    in_flight: JoinSet<()>,
    timer_tx: mpsc::WeakSender<SchedulerCommand>,
}

impl SchedulerWorker {
    async fn run(mut self, mut command_rx: mpsc::Receiver<SchedulerCommand>) {
        // 主事件循环, 循环等待命令
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SchedulerCommand::Shutdown { reply }) => {
                            self.drain().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            self.drain().await;
                            break;
                        }
                    }
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(err) = joined {
                        warn!("Upload task panicked: {}", err);
                    }
                }
            }
        }

        debug!("Countdown scheduler stopped");
    }

    /// worker 里不做任何等待：事件交给 relay 后立即返回
    fn handle_command(&mut self, command: SchedulerCommand) {
        let retired = self.table.retire_expired(Instant::now());
        if retired > 0 {
            debug!(retired, "Retired settled upload ids");
        }

        match command {
            SchedulerCommand::Schedule { profile, image_url, page_url, surface, delay, reply } => {
                let upload_id = self.schedule(profile, image_url, page_url, surface, delay);
                let _ = reply.send(upload_id);
            }
            SchedulerCommand::Cancel { upload_id, reply } => {
                self.cancel(&upload_id);
                let _ = reply.send(());
            }
            SchedulerCommand::Fire { upload_id } => {
                self.fire(&upload_id);
            }
            SchedulerCommand::GetState { upload_id, reply } => {
                let _ = reply.send(self.table.state(&upload_id));
            }
            SchedulerCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn schedule(
        &mut self,
        profile: ServerProfile,
        image_url: String,
        page_url: String,
        surface: SurfaceRef,
        delay: Duration,
    ) -> UploadId {
        let upload_id = UploadId::new();

        let timer = CancellationToken::new();
        self.arm_timer(upload_id.clone(), delay, timer.clone());

        let server_name = profile.name.clone();
        let pending = PendingUpload::new(upload_id.clone(), profile, image_url, page_url, surface.clone(), delay);
        info!(%upload_id, server = %server_name, fire_at = %pending.fire_at, "Countdown started");
        self.table.insert(pending, timer);

        self.relay.notify(&surface, UploadEvent::Started {
            upload_id: upload_id.clone(),
            server_name,
            delay_seconds: whole_seconds(delay),
        });

        upload_id
    }

    fn arm_timer(&self, upload_id: UploadId, delay: Duration, timer: CancellationToken) {
        let timer_tx = self.timer_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(tx) = timer_tx.upgrade() {
                        let _ = tx.send(SchedulerCommand::Fire { upload_id }).await;
                    }
                }
            }
        });
    }

    fn cancel(&mut self, upload_id: &UploadId) {
        match self.table.take_for_cancel(upload_id) {
            Some(pending) => {
                info!(%upload_id, waited_ms = pending.waited_ms(), "Countdown cancelled");
                self.relay.notify(&pending.surface, UploadEvent::Cancelled { upload_id: upload_id.clone() });
            }
            None => {
                debug!(%upload_id, "Cancel ignored: upload not pending");
            }
        }
    }

    fn fire(&mut self, upload_id: &UploadId) {
        // 先移出表再执行，之后到达的取消不会影响本次上传
        let pending = match self.table.take_for_fire(upload_id) {
            Some(pending) => pending,
            None => {
                debug!(%upload_id, "Fire ignored: upload not pending");
                return;
            }
        };

        info!(
            %upload_id,
            server = %pending.profile.name,
            image = %pending.image_url,
            waited_ms = pending.waited_ms(),
            "Countdown finished, uploading"
        );

        let uploader = self.uploader.clone();
        let relay = self.relay.clone();
        self.in_flight.spawn(async move {
            let PendingUpload { id, profile, image_url, page_url, surface, .. } = pending;

            relay.notify(&surface, UploadEvent::Uploading { upload_id: id.clone() });
            let outcome = uploader.upload(&profile, &image_url, &page_url).await;
            relay.notify(&surface, outcome.into_event(id));
        });
    }

    async fn drain(&mut self) {
        info!(
            pending = self.table.pending_count(),
            in_flight = self.in_flight.len(),
            "Shutting down countdown scheduler"
        );

        for pending in self.table.drain() {
            self.relay.notify(&pending.surface, UploadEvent::Cancelled { upload_id: pending.id.clone() });
        }

        // 不中断已经开始的 PUT
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(err) = joined {
                warn!("Upload task panicked: {}", err);
            }
        }
    }
}

/// 不足一秒按一秒计，`50ms` 不会显示成 `0`
fn whole_seconds(delay: Duration) -> u64 {
    delay.as_secs() + u64::from(delay.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use crate::core::relay::SurfaceRegistry;
    use crate::core::types::UploadOutcome;

    /// 模拟上传器 - 记录调用次数
    struct CountingUploader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Uploader for CountingUploader {
        async fn upload(&self, _profile: &ServerProfile, image_url: &str, _page_url: &str) -> UploadOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            UploadOutcome::Success { filename: format!("{}.png", image_url.len()) }
        }
    }

    fn profile() -> ServerProfile {
        ServerProfile::new("Home", "https://dav.example.com/", "alice", "pw", "/Photos")
    }

    fn setup() -> (SchedulerHandle, Arc<CountingUploader>) {
        let uploader = Arc::new(CountingUploader { calls: AtomicUsize::new(0) });
        let relay = NotificationRelay::new(Arc::new(SurfaceRegistry::new()));
        (CountdownScheduler::new(uploader.clone(), relay), uploader)
    }

    async fn schedule(scheduler: &CountdownScheduler, delay: u64) -> UploadId {
        scheduler
            .schedule(profile(), "https://img.example.com/a.png", "https://page.example.com/", SurfaceRef::new("tab"), Duration::from_secs(delay))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (handle, uploader) = setup();
        let scheduler = handle.scheduler.clone();
        let mut events = scheduler.subscribe_events();

        let id = schedule(&scheduler, 5).await;
        assert_eq!(scheduler.state(&id).await.unwrap(), Some(UploadState::Scheduled));

        assert!(matches!(events.recv().await.unwrap(), UploadEvent::Started { delay_seconds: 5, .. }));
        assert_eq!(events.recv().await.unwrap(), UploadEvent::Uploading { upload_id: id.clone() });
        assert!(matches!(events.recv().await.unwrap(), UploadEvent::Succeeded { .. }));

        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(&id).await.unwrap(), Some(UploadState::Fired));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire_prevents_upload() {
        let (handle, uploader) = setup();
        let scheduler = handle.scheduler.clone();
        let mut events = scheduler.subscribe_events();

        let id = schedule(&scheduler, 5).await;
        scheduler.cancel(&id).await;

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(matches!(events.recv().await.unwrap(), UploadEvent::Started { .. }));
        assert_eq!(events.recv().await.unwrap(), UploadEvent::Cancelled { upload_id: id.clone() });
        assert!(events.try_recv().is_err());
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(&id).await.unwrap(), Some(UploadState::Cancelled));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let (handle, uploader) = setup();
        let scheduler = handle.scheduler.clone();

        let id = schedule(&scheduler, 1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        scheduler.cancel(&id).await;
        scheduler.cancel(&id).await;
        assert_eq!(scheduler.state(&id).await.unwrap(), Some(UploadState::Fired));

        handle.shutdown().await.unwrap();
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_expiry_fires_once() {
        let (handle, uploader) = setup();
        let scheduler = handle.scheduler.clone();

        let id = schedule(&scheduler, 60).await;
        scheduler.fire_now(&id).await.unwrap();
        scheduler.fire_now(&id).await.unwrap();

        // 真正的定时器随后到期也不会再触发
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(scheduler.state(&id).await.unwrap(), Some(UploadState::Fired));
        handle.shutdown().await.unwrap();
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_uploads() {
        let (handle, uploader) = setup();
        let scheduler = handle.scheduler.clone();

        let first = schedule(&scheduler, 5).await;
        let second = schedule(&scheduler, 5).await;
        let third = schedule(&scheduler, 10).await;
        assert_ne!(first, second);

        scheduler.cancel(&second).await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(scheduler.state(&first).await.unwrap(), Some(UploadState::Fired));
        assert_eq!(scheduler.state(&second).await.unwrap(), Some(UploadState::Cancelled));
        assert_eq!(scheduler.state(&third).await.unwrap(), Some(UploadState::Fired));
        handle.shutdown().await.unwrap();
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending() {
        let (handle, uploader) = setup();
        let scheduler = handle.scheduler.clone();
        let mut events = scheduler.subscribe_events();

        let id = schedule(&scheduler, 30).await;
        handle.shutdown().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), UploadEvent::Started { .. }));
        assert_eq!(events.recv().await.unwrap(), UploadEvent::Cancelled { upload_id: id.clone() });
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);

        // 关闭后调度失败、取消静默
        let err = scheduler
            .schedule(profile(), "https://img.example.com/a.png", "https://page.example.com/", SurfaceRef::new("tab"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::SchedulerShutdown));
        scheduler.cancel(&id).await;
    }

    #[test]
    fn test_upload_state_transition() {
        use UploadState::*;

        // valid
        assert!(Scheduled.can_transition_to(Fired));
        assert!(Scheduled.can_transition_to(Cancelled));

        // invalid
        assert!(!Fired.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Fired));
        assert!(!Fired.can_transition_to(Fired));
        assert!(!Scheduled.can_transition_to(Scheduled));
        assert!(Fired.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_secs(5)), 5);
        assert_eq!(whole_seconds(Duration::from_millis(50)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(5_001)), 6);
        assert_eq!(whole_seconds(Duration::ZERO), 0);
    }

    /// 对 "stuck" 界面的投递永远不返回
    struct StuckSink;

    #[async_trait]
    impl crate::core::traits::NotificationSink for StuckSink {
        async fn deliver(&self, surface: &SurfaceRef, _event: &UploadEvent) -> Result<()> {
            if surface.0 == "stuck" {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_surface_does_not_stall_scheduler() {
        let uploader = Arc::new(CountingUploader { calls: AtomicUsize::new(0) });
        let handle = CountdownScheduler::new(uploader.clone(), NotificationRelay::new(Arc::new(StuckSink)));
        let scheduler = handle.scheduler.clone();

        let stuck = scheduler
            .schedule(profile(), "https://img.example.com/a.png", "https://page.example.com/", SurfaceRef::new("stuck"), Duration::from_secs(1))
            .await
            .unwrap();

        let healthy = tokio::time::timeout(
            Duration::from_secs(60),
            scheduler.schedule(profile(), "https://img.example.com/b.png", "https://page.example.com/", SurfaceRef::new("healthy"), Duration::from_secs(1)),
        )
        .await
        .expect("scheduling for another surface must not wait on a stuck one")
        .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(scheduler.state(&stuck).await.unwrap(), Some(UploadState::Fired));
        assert_eq!(scheduler.state(&healthy).await.unwrap(), Some(UploadState::Fired));
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_ids_retire_after_retention() {
        let (handle, _) = setup();
        let scheduler = handle.scheduler.clone();

        let mut ids = Vec::new();
        for _ in 0..1000 {
            let id = schedule(&scheduler, 5).await;
            scheduler.cancel(&id).await;
            ids.push(id);
        }
        assert_eq!(scheduler.state(&ids[999]).await.unwrap(), Some(UploadState::Cancelled));

        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(scheduler.state(&ids[0]).await.unwrap(), None);
        assert_eq!(scheduler.state(&ids[999]).await.unwrap(), None);
        handle.shutdown().await.unwrap();
    }
}
