use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use super::errors::Result;
use super::profile::{ProfileMetadata, ServerProfile};
use super::traits::ProfileStore;

async fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) if data.trim().is_empty() => Ok(Vec::new()),
        Ok(data) => Ok(serde_json::from_str(&data)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

async fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let data = serde_json::to_string_pretty(records)?;

    // 先写临时文件再改名，中途崩溃不会留下半个文件
    let tmp_path = temp_path(path);
    tokio::fs::write(&tmp_path, data).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// 本地持久化存储，保存完整配置（含密码）
///
/// 读改写在同一把锁下完成，clone 出来的句柄共享这把锁。
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn get(&self, id: &str) -> Result<Option<ServerProfile>> {
        let profiles: Vec<ServerProfile> = read_records(&self.path).await?;
        Ok(profiles.into_iter().find(|p| p.id == id))
    }

    async fn list(&self) -> Result<Vec<ServerProfile>> {
        read_records(&self.path).await
    }

    async fn put(&self, profile: ServerProfile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut profiles: Vec<ServerProfile> = read_records(&self.path).await?;
        match profiles.iter().position(|p| p.id == profile.id) {
            Some(index) => profiles[index] = profile,
            None => profiles.push(profile),
        }
        write_records(&self.path, &profiles).await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut profiles: Vec<ServerProfile> = read_records(&self.path).await?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Ok(false);
        }
        write_records(&self.path, &profiles).await?;
        Ok(true)
    }
}

/// 可同步的元数据镜像，永远不保存密码
///
/// 读出来的配置密码为空，只能用来展示或跨设备识别。
#[derive(Debug, Clone)]
pub struct MetadataMirror {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl MetadataMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 用一组完整配置整体覆盖镜像
    pub async fn replace_all(&self, profiles: &[ServerProfile]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let records: Vec<ProfileMetadata> = profiles.iter().map(ServerProfile::metadata).collect();
        write_records(&self.path, &records).await
    }
}

#[async_trait]
impl ProfileStore for MetadataMirror {
    async fn get(&self, id: &str) -> Result<Option<ServerProfile>> {
        let records: Vec<ProfileMetadata> = read_records(&self.path).await?;
        Ok(records.into_iter().find(|m| m.id == id).map(ServerProfile::from))
    }

    async fn list(&self) -> Result<Vec<ServerProfile>> {
        let records: Vec<ProfileMetadata> = read_records(&self.path).await?;
        Ok(records.into_iter().map(ServerProfile::from).collect())
    }

    async fn put(&self, profile: ServerProfile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records: Vec<ProfileMetadata> = read_records(&self.path).await?;
        let meta = profile.metadata();
        match records.iter().position(|m| m.id == meta.id) {
            Some(index) => records[index] = meta,
            None => records.push(meta),
        }
        write_records(&self.path, &records).await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records: Vec<ProfileMetadata> = read_records(&self.path).await?;
        let before = records.len();
        records.retain(|m| m.id != id);
        if records.len() == before {
            return Ok(false);
        }
        write_records(&self.path, &records).await?;
        Ok(true)
    }
}

/// 双层存储：读优先本地层（含密码），写时同步一份脱敏镜像
#[derive(Debug, Clone)]
pub struct TieredProfileStore {
    local: FileProfileStore,
    mirror: Option<MetadataMirror>,
    /// 本地层和镜像一起更新，避免镜像落后于本地层
    sync_lock: Arc<Mutex<()>>,
}

impl TieredProfileStore {
    pub fn new(local: FileProfileStore, mirror: Option<MetadataMirror>) -> Self {
        Self {
            local,
            mirror,
            sync_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn sync_mirror(&self) -> Result<()> {
        if let Some(mirror) = &self.mirror {
            let profiles = self.local.list().await?;
            mirror.replace_all(&profiles).await?;
            debug!(count = profiles.len(), "Synced profile metadata mirror");
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for TieredProfileStore {
    async fn get(&self, id: &str) -> Result<Option<ServerProfile>> {
        if let Some(profile) = self.local.get(id).await? {
            return Ok(Some(profile));
        }

        match &self.mirror {
            Some(mirror) => {
                let profile = mirror.get(id).await?;
                if profile.is_some() {
                    warn!(profile_id = id, "Profile only found in metadata mirror, password is missing");
                }
                Ok(profile)
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ServerProfile>> {
        let profiles = self.local.list().await?;
        if !profiles.is_empty() {
            return Ok(profiles);
        }

        match &self.mirror {
            Some(mirror) => mirror.list().await,
            None => Ok(profiles),
        }
    }

    async fn put(&self, profile: ServerProfile) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        self.local.put(profile).await?;
        self.sync_mirror().await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.sync_lock.lock().await;
        let removed = self.local.remove(id).await?;
        if let Some(mirror) = &self.mirror {
            mirror.remove(id).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(name: &str) -> ServerProfile {
        ServerProfile::new(name, "https://dav.example.com/files/", "alice", "s3cret", "/Photos")
    }

    #[tokio::test]
    async fn test_file_store_put_get_list() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path().join("profiles.json"));

        assert!(store.list().await.unwrap().is_empty());

        let first = profile("Home");
        let second = profile("Work");
        store.put(first.clone()).await.unwrap();
        store.put(second.clone()).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![first.clone(), second.clone()]);
        assert_eq!(store.get(&first.id).await.unwrap(), Some(first.clone()));
        assert_eq!(store.get("missing").await.unwrap(), None);

        // 覆盖同 id 保持顺序
        let mut edited = first.clone();
        edited.folder = "/Other".to_string();
        store.put(edited.clone()).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec![edited, second]);
    }

    #[tokio::test]
    async fn test_file_store_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path().join("profiles.json"));
        let home = profile("Home");
        store.put(home.clone()).await.unwrap();

        assert!(store.remove(&home.id).await.unwrap());
        assert!(!store.remove(&home.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirror_never_stores_password() {
        let dir = TempDir::new().unwrap();
        let mirror_path = dir.path().join("meta.json");
        let store = TieredProfileStore::new(
            FileProfileStore::new(dir.path().join("profiles.json")),
            Some(MetadataMirror::new(&mirror_path)),
        );

        let home = profile("Home");
        store.put(home.clone()).await.unwrap();

        let raw = tokio::fs::read_to_string(&mirror_path).await.unwrap();
        assert!(raw.contains("Home"));
        assert!(!raw.contains("s3cret"));

        // 读优先走含密码的本地层
        let loaded = store.get(&home.id).await.unwrap().unwrap();
        assert_eq!(loaded.password, "s3cret");
    }

    #[tokio::test]
    async fn test_tiered_falls_back_to_mirror() {
        let dir = TempDir::new().unwrap();
        let mirror = MetadataMirror::new(dir.path().join("meta.json"));
        let home = profile("Home");
        mirror.put(home.clone()).await.unwrap();

        let store = TieredProfileStore::new(
            FileProfileStore::new(dir.path().join("profiles.json")),
            Some(mirror),
        );

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].password.is_empty());

        let loaded = store.get(&home.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Home");
    }

    #[tokio::test]
    async fn test_tiered_remove_clears_both_tiers() {
        let dir = TempDir::new().unwrap();
        let mirror = MetadataMirror::new(dir.path().join("meta.json"));
        let store = TieredProfileStore::new(
            FileProfileStore::new(dir.path().join("profiles.json")),
            Some(mirror.clone()),
        );

        let home = profile("Home");
        store.put(home.clone()).await.unwrap();
        assert!(store.remove(&home.id).await.unwrap());

        assert!(store.get(&home.id).await.unwrap().is_none());
        assert!(mirror.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_keep_every_profile() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TieredProfileStore::new(
            FileProfileStore::new(dir.path().join("profiles.json")),
            Some(MetadataMirror::new(dir.path().join("meta.json"))),
        ));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let mut server = profile(&format!("Server {}", i));
            server.id = format!("server_{}", i);
            tasks.push(tokio::spawn(async move { store.put(server).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 20);
        let mirror = MetadataMirror::new(dir.path().join("meta.json"));
        assert_eq!(mirror.list().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        let store = FileProfileStore::new(&path);

        store.put(profile("Home")).await.unwrap();

        assert!(path.exists());
        assert!(!temp_path(&path).exists());
        assert_eq!(temp_path(&path), dir.path().join("profiles.json.tmp"));
    }
}
