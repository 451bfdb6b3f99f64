use chrono::{DateTime, TimeZone};
use url::Url;

const DEFAULT_EXTENSION: &str = "jpg";

/// 生成上传文件名
///
/// `image_<YYYYMMDDHHMMSS>_<host>.<ext>`，任何解析失败都降级为
/// `image_<epoch-millis>_fallback.<ext>`，不会出错。
pub fn derive_filename<Tz>(image_url: &str, page_url: &str, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let parsed = Url::parse(image_url)
        .ok()
        .zip(Url::parse(page_url).ok())
        .and_then(|(image, page)| {
            let host = page.host_str()?.replace('.', "_");
            Some((extension_from_url(&image), host))
        });

    match parsed {
        Some((extension, host)) => {
            format!("image_{}_{}.{}", now.format("%Y%m%d%H%M%S"), host, extension)
        }
        None => {
            format!(
                "image_{}_fallback.{}",
                now.timestamp_millis(),
                extension_from_raw(image_url)
            )
        }
    }
}

fn extension_from_url(url: &Url) -> String {
    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    sanitize_extension(last_segment)
}

/// 无法解析时直接在原始字符串上猜扩展名
fn extension_from_raw(raw: &str) -> String {
    let without_suffix = raw
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let last_segment = without_suffix
        .rsplit('/')
        .next()
        .unwrap_or_default();

    sanitize_extension(last_segment)
}

fn sanitize_extension(segment: &str) -> String {
    match segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}
