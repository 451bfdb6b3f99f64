use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};
use super::errors::{DavError, Result};
use super::traits::NotificationSink;
use super::types::{SurfaceRef, UploadEvent};

/// 每个界面一个投递任务，按顺序投递该界面的事件
struct Forwarder {
    generation: u64,
    tx: mpsc::UnboundedSender<UploadEvent>,
}

#[derive(Default)]
struct Forwarders {
    next_generation: u64,
    by_surface: HashMap<SurfaceRef, Forwarder>,
}

/// 事件中继
///
/// 每个事件先广播给进程内订阅者，再交给该界面的投递任务。
/// `notify` 不等待投递：某个界面卡住只会积压它自己的事件，
/// 投递失败只记录日志，不会回传给调度器或执行器。
#[derive(Clone)]
pub struct NotificationRelay {
    sink: Arc<dyn NotificationSink>,
    event_tx: broadcast::Sender<UploadEvent>,
    forwarders: Arc<Mutex<Forwarders>>,
}

impl NotificationRelay {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);
        Self {
            sink,
            event_tx,
            forwarders: Arc::new(Mutex::new(Forwarders::default())),
        }
    }

    /// 需要在 tokio runtime 内调用
    pub fn notify(&self, surface: &SurfaceRef, event: UploadEvent) {
        debug!(upload_id = %event.upload_id(), %surface, ?event, "Relaying upload event");
        let _ = self.event_tx.send(event.clone());

        let mut forwarders = self.forwarders.lock().unwrap_or_else(PoisonError::into_inner);
        let event = match forwarders.by_surface.get(surface) {
            Some(forwarder) => match forwarder.tx.send(event) {
                Ok(()) => return,
                // 投递任务已退出，重新起一个
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let generation = forwarders.next_generation;
        forwarders.next_generation += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(event);
        forwarders.by_surface.insert(surface.clone(), Forwarder { generation, tx });
        drop(forwarders);

        tokio::spawn(forward(
            self.sink.clone(),
            surface.clone(),
            generation,
            rx,
            Arc::downgrade(&self.forwarders),
        ));
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }
}

async fn forward(
    sink: Arc<dyn NotificationSink>,
    surface: SurfaceRef,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<UploadEvent>,
    forwarders: Weak<Mutex<Forwarders>>,
) {
    while let Some(event) = rx.recv().await {
        if let Err(err) = sink.deliver(&surface, &event).await {
            warn!(upload_id = %event.upload_id(), %surface, "Could not deliver notification: {}", err);

            // 界面已经不在了：注销自己，剩下的事件照常尝试后退出
            if let Some(forwarders) = forwarders.upgrade() {
                let mut forwarders = forwarders.lock().unwrap_or_else(PoisonError::into_inner);
                if forwarders.by_surface.get(&surface).is_some_and(|f| f.generation == generation) {
                    forwarders.by_surface.remove(&surface);
                }
            }
        }
    }

    debug!(%surface, "Notification forwarder stopped");
}

/// 进程内的界面注册表
///
/// 界面注册后拿到自己的事件接收端；界面关闭（接收端被丢弃）或注销后，
/// 投递会返回 `SurfaceUnreachable`。
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    surfaces: Arc<RwLock<HashMap<SurfaceRef, mpsc::UnboundedSender<UploadEvent>>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, surface: SurfaceRef) -> mpsc::UnboundedReceiver<UploadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.surfaces.write().await.insert(surface, tx);
        rx
    }

    pub async fn unregister(&self, surface: &SurfaceRef) -> bool {
        self.surfaces.write().await.remove(surface).is_some()
    }
}

#[async_trait]
impl NotificationSink for SurfaceRegistry {
    async fn deliver(&self, surface: &SurfaceRef, event: &UploadEvent) -> Result<()> {
        let sent = match self.surfaces.read().await.get(surface) {
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => return Err(DavError::SurfaceUnreachable(surface.to_string())),
        };

        if !sent {
            // 接收端已经没了，顺手清理
            self.surfaces.write().await.remove(surface);
            return Err(DavError::SurfaceUnreachable(surface.to_string()));
        }

        Ok(())
    }
}
