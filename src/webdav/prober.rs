use std::collections::HashSet;
use std::sync::LazyLock;
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use url::Url;
use crate::core::{DavError, FolderProbeResult, Result};
use super::client::WebDavClient;

/// 任意命名空间前缀的 `<href>`
static HREF_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z0-9_.-]+:)?href\b[^>]*>(.*?)</(?:[A-Za-z0-9_.-]+:)?href\s*>").ok()
});

const BODY_EXCERPT_CHARS: usize = 200;

pub const LIMITED_LISTING_NOTE: &str =
    "Connected, but the server does not allow folder listing from here; only the root folder is available";

/// 连接测试 / 目录探测
#[derive(Debug, Clone, Default)]
pub struct FolderProber {
    client: WebDavClient,
}

impl FolderProber {
    pub fn new(client: WebDavClient) -> Self {
        Self { client }
    }

    /// PROPFIND 优先，请求本身失败时退回 HEAD；结果永远不是错误
    pub async fn probe(&self, url: &str, username: &str, password: &str) -> FolderProbeResult {
        let base = match parse_base(url) {
            Ok(base) => base,
            Err(err) => return FolderProbeResult::failure(err.to_string()),
        };
        let probe_url = base.to_string();

        info!(url = %probe_url, "Testing WebDAV connection");

        let response = match self.client.propfind(&probe_url, username, password).await {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %probe_url, "PROPFIND failed, falling back to HEAD: {}", err);
                return self.probe_with_head(&probe_url, username, password).await;
            }
        };

        let status = response.status();
        let result = match status {
            StatusCode::MULTI_STATUS => {
                let body = response.text().await.map_err(DavError::from);
                folders_from_body(body, &base)
            }
            StatusCode::UNAUTHORIZED => Err(DavError::Auth),
            StatusCode::NOT_FOUND => Err(DavError::NotFound),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(DavError::http_status(status.as_u16(), excerpt(&body)))
            }
        };

        match result {
            Ok(folders) => {
                debug!(count = folders.len(), "Discovered folders");
                FolderProbeResult::Success { folders, note: None }
            }
            Err(err) => {
                warn!(url = %probe_url, "Connection test failed: {}", err);
                FolderProbeResult::failure(err.to_string())
            }
        }
    }

    async fn probe_with_head(&self, url: &str, username: &str, password: &str) -> FolderProbeResult {
        let response = match self.client.head(url, username, password).await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, "HEAD fallback failed: {}", err);
                return FolderProbeResult::failure(format!(
                    "Could not reach the server ({}). This is usually a network problem, \
                     a cross-origin restriction or an untrusted certificate",
                    err
                ));
            }
        };

        classify_head(response.status())
    }
}

/// HEAD 降级探测的状态码映射
fn classify_head(status: StatusCode) -> FolderProbeResult {
    // 对集合做 HEAD 返回 404 也说明可达且认证通过
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return FolderProbeResult::Success {
            folders: vec!["/".to_string()],
            note: Some(LIMITED_LISTING_NOTE.to_string()),
        };
    }

    let err = if status == StatusCode::UNAUTHORIZED {
        DavError::Auth
    } else {
        DavError::http_status(status.as_u16(), "")
    };
    FolderProbeResult::failure(err.to_string())
}

/// 读取 207 响应体失败时整体失败，不当作空列表
fn folders_from_body(body: Result<String>, base: &Url) -> Result<Vec<String>> {
    parse_folder_listing(&body?, base)
}

/// 解析并保证只有一个结尾 `/`
fn parse_base(url: &str) -> Result<Url> {
    let url = url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(DavError::configuration("URL must start with http:// or https://"));
    }

    let mut base = Url::parse(url).map_err(|err| DavError::Parse(format!("Invalid URL '{}': {}", url, err)))?;
    let path = format!("{}/", base.path().trim_end_matches('/'));
    base.set_path(&path);
    Ok(base)
}

/// 从 207 响应里提取相对于 `base` 的目录
///
/// 只看以 `/` 结尾的 href；绝对 href 的主机必须和 `base` 一致。
pub fn parse_folder_listing(body: &str, base: &Url) -> Result<Vec<String>> {
    let re = HREF_RE
        .as_ref()
        .ok_or_else(|| DavError::internal("href pattern failed to compile"))?;

    let base_path = decode(base.path());
    let base_path = format!("{}/", base_path.trim_end_matches('/'));

    let mut folders = vec!["/".to_string()];
    let mut seen: HashSet<String> = folders.iter().cloned().collect();

    for caps in re.captures_iter(body) {
        let href = match caps.get(1) {
            Some(m) => m.as_str().trim(),
            None => continue,
        };
        if !href.ends_with('/') {
            continue;
        }

        let path = href_path(href, base)?;
        let path = decode(&path);

        let relative = match path.strip_prefix(&base_path) {
            Some(rest) => rest,
            None if format!("{}/", path.trim_end_matches('/')) == base_path => "",
            None => {
                debug!(href, "Ignoring href outside the configured root");
                continue;
            }
        };

        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            continue;
        }

        let folder = format!("/{}", relative);
        if seen.insert(folder.clone()) {
            folders.push(folder);
        }
    }

    Ok(folders)
}

fn href_path(href: &str, base: &Url) -> Result<String> {
    if !href.starts_with("http://") && !href.starts_with("https://") {
        return Ok(href.to_string());
    }

    let absolute = Url::parse(href).map_err(|err| DavError::Parse(format!("Invalid href '{}': {}", href, err)))?;
    let expected = base.host_str().unwrap_or_default();
    let found = absolute.host_str().unwrap_or_default();
    if !found.eq_ignore_ascii_case(expected) {
        return Err(DavError::HostMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }

    Ok(absolute.path().to_string())
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}
