use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use tracing::debug;
use crate::core::{DavError, Result};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 请求 `resourcetype` 和 `displayname` 的最小 PROPFIND 请求体
const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:displayname/>
  </d:prop>
</d:propfind>"#;

/// 下载得到的图片
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// WebDAV 用到的几种请求
///
/// 不设超时：服务器挂起时该次上传会一直等待。
#[derive(Debug, Clone, Default)]
pub struct WebDavClient {
    client: Client,
}

impl WebDavClient {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// `Basic base64(username:password)`
    pub fn basic_auth(username: &str, password: &str) -> String {
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", username, password));
        format!("Basic {}", credentials)
    }

    fn create_headers(username: &str, password: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&Self::basic_auth(username, password))
            .map_err(|err| DavError::configuration(format!("Invalid credentials: {}", err)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        Ok(headers)
    }

    /// GET 图片，不带认证
    pub async fn fetch_image(&self, image_url: &str) -> Result<FetchedImage> {
        let response = self.client.get(image_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DavError::ImageFetch { status: status.as_u16() });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let bytes = response.bytes().await?;
        debug!(image = image_url, size = bytes.len(), %content_type, "Fetched image");

        Ok(FetchedImage { bytes, content_type })
    }

    pub async fn put(
        &self,
        target_url: &str,
        username: &str,
        password: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<Response> {
        let mut headers = Self::create_headers(username, password)?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
        );

        debug!(url = target_url, "Sending PUT");
        let response = self.client
            .put(target_url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        Ok(response)
    }

    /// PROPFIND，`Depth: 1`
    pub async fn propfind(&self, url: &str, username: &str, password: &str) -> Result<Response> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|err| DavError::internal(err.to_string()))?;

        let mut headers = Self::create_headers(username, password)?;
        headers.insert("Depth", HeaderValue::from_static("1"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"));

        debug!(url, "Sending PROPFIND");
        let response = self.client
            .request(method, url)
            .headers(headers)
            .body(PROPFIND_BODY)
            .send()
            .await?;

        Ok(response)
    }

    pub async fn head(&self, url: &str, username: &str, password: &str) -> Result<Response> {
        let headers = Self::create_headers(username, password)?;

        debug!(url, "Sending HEAD");
        let response = self.client.head(url).headers(headers).send().await?;

        Ok(response)
    }
}
