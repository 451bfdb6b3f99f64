use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::{DavError, Result};

fn root_folder() -> String {
    "/".to_string()
}

/// WebDAV 服务器配置
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerProfile {
    pub id: String,
    pub name: String,
    /// 服务器地址，必须是 http/https
    pub url: String,
    pub username: String,
    /// 敏感字段，不会写入元数据镜像
    #[serde(default)]
    pub password: String,
    /// 目标目录，以 `/` 开头，除根目录外不以 `/` 结尾
    #[serde(default = "root_folder")]
    pub folder: String,
}

// 手写 Debug，避免密码出现在日志里
impl std::fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .finish()
    }
}

impl ServerProfile {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        folder: &str,
    ) -> Self {
        Self {
            id: Self::generate_id(),
            name: name.into().trim().to_string(),
            url: url.into().trim().to_string(),
            username: username.into().trim().to_string(),
            password: password.into(),
            folder: normalize_folder(folder),
        }
    }

    /// `server_<epoch-millis>_<6 hex>`
    pub fn generate_id() -> String {
        let random = Uuid::new_v4().simple().to_string();
        format!("server_{}_{}", Utc::now().timestamp_millis(), &random[..6])
    }

    /// Check required fields before any network call
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DavError::configuration("profile name is required"));
        }
        if self.url.trim().is_empty() {
            return Err(DavError::configuration(format!("profile '{}' has no URL", self.name)));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(DavError::configuration(format!(
                "URL of profile '{}' must start with http:// or https://",
                self.name
            )));
        }
        if self.username.trim().is_empty() {
            return Err(DavError::configuration(format!("profile '{}' has no username", self.name)));
        }

        Ok(())
    }

    pub fn metadata(&self) -> ProfileMetadata {
        ProfileMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            username: self.username.clone(),
            folder: self.folder.clone(),
        }
    }
}

/// 可同步的非敏感元数据（不含密码）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileMetadata {
    pub id: String,
    pub name: String,
    pub url: String,
    pub username: String,
    #[serde(default = "root_folder")]
    pub folder: String,
}

impl From<ProfileMetadata> for ServerProfile {
    fn from(meta: ProfileMetadata) -> Self {
        Self {
            id: meta.id,
            name: meta.name,
            url: meta.url,
            username: meta.username,
            password: String::new(),
            folder: normalize_folder(&meta.folder),
        }
    }
}

/// `images/` -> `/images`, `` -> `/`
pub fn normalize_folder(folder: &str) -> String {
    let folder = folder.trim();
    let mut normalized = if folder.starts_with('/') {
        folder.to_string()
    } else {
        format!("/{}", folder)
    };

    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(url: &str) -> ServerProfile {
        ServerProfile::new("Home", url, "alice", "s3cret", "/Photos")
    }

    #[test]
    fn test_normalize_folder() {
        assert_eq!(normalize_folder(""), "/");
        assert_eq!(normalize_folder("/"), "/");
        assert_eq!(normalize_folder("images"), "/images");
        assert_eq!(normalize_folder("/images/"), "/images");
        assert_eq!(normalize_folder(" a/b// "), "/a/b");
    }

    #[test]
    fn test_validate() {
        assert!(profile("https://dav.example.com/").validate().is_ok());
        assert!(profile("http://dav.example.com/").validate().is_ok());

        let err = profile("ftp://dav.example.com/").validate().unwrap_err();
        assert!(matches!(err, DavError::Configuration(_)));

        let mut missing_user = profile("https://dav.example.com/");
        missing_user.username = " ".to_string();
        assert!(missing_user.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let output = format!("{:?}", profile("https://dav.example.com/"));
        assert!(!output.contains("s3cret"));
        assert!(output.contains("<redacted>"));
    }

    #[test]
    fn test_metadata_round_trip_drops_secret() {
        let original = profile("https://dav.example.com/");
        let restored = ServerProfile::from(original.metadata());

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.folder, "/Photos");
        assert!(restored.password.is_empty());
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = ServerProfile::generate_id();
        let b = ServerProfile::generate_id();
        assert_ne!(a, b);
        assert!(a.starts_with("server_"));
    }
}
