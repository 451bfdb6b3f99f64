use std::sync::LazyLock;
use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use reqwest::{Response, StatusCode};
use tracing::{info, warn};
use crate::core::{DavError, Result, ServerProfile, UploadOutcome, Uploader};
use super::client::WebDavClient;
use super::filename::derive_filename;
use super::url::build_target_url;

/// 服务器错误体里的 `<d:message>…</d:message>`，前缀可有可无
static MESSAGE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z0-9_.-]+:)?message\b[^>]*>(.*?)</(?:[A-Za-z0-9_.-]+:)?message\s*>").ok()
});

const BODY_EXCERPT_CHARS: usize = 100;

/// WebDAV 上传执行器
#[derive(Debug, Clone, Default)]
pub struct WebDavUploader {
    client: WebDavClient,
}

impl WebDavUploader {
    pub fn new(client: WebDavClient) -> Self {
        Self { client }
    }

    /// 完整流程，任何一步失败都以错误返回
    pub async fn try_upload(&self, profile: &ServerProfile, image_url: &str, page_url: &str) -> Result<String> {
        profile.validate()?;

        let filename = derive_filename(image_url, page_url, &Local::now());
        let image = self.client.fetch_image(image_url).await?;
        let target_url = build_target_url(&profile.url, &profile.folder, &filename)?;

        let response = self.client
            .put(&target_url, &profile.username, &profile.password, &image.content_type, image.bytes)
            .await?;

        let status = response.status();
        if is_stored(status) {
            info!(server = %profile.name, url = %target_url, "Image uploaded");
            return Ok(filename);
        }

        Err(classify_failure(response).await)
    }
}

#[async_trait]
impl Uploader for WebDavUploader {
    async fn upload(&self, profile: &ServerProfile, image_url: &str, page_url: &str) -> UploadOutcome {
        match self.try_upload(profile, image_url, page_url).await {
            Ok(filename) => UploadOutcome::Success { filename },
            Err(err) => {
                warn!(server = %profile.name, image = image_url, "Upload failed: {}", err);
                UploadOutcome::failure(err.to_string())
            }
        }
    }
}

fn is_stored(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::CREATED || status == StatusCode::NO_CONTENT
}

async fn classify_failure(response: Response) -> DavError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return DavError::Auth;
    }

    let body = response.text().await.unwrap_or_default();
    DavError::http_status(status.as_u16(), failure_detail(&body))
}

/// 优先取 `<message>` 的内容，否则截取响应体前 100 个字符
pub(crate) fn failure_detail(body: &str) -> String {
    if let Some(message) = extract_message(body) {
        return message;
    }

    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}

fn extract_message(body: &str) -> Option<String> {
    let re = MESSAGE_RE.as_ref()?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
}
