use crate::core::{DavError, Result};

/// 拼接上传地址
///
/// `base/` + `folder/`（根目录时为空）+ 编码后的文件名。
/// 只编码文件名，目录分隔符保持原样；路径里不会出现 `//`。
pub fn build_target_url(base: &str, folder: &str, filename: &str) -> Result<String> {
    let mut url = normalize_base(base)?;

    let folder = folder_segments(folder);
    if !folder.is_empty() {
        url.push_str(&folder);
        url.push('/');
    }

    url.push_str(&urlencoding::encode(filename));
    Ok(url)
}

/// `https://host//a/b` -> `https://host/a/b/`
pub fn normalize_base(base: &str) -> Result<String> {
    let base = base.trim();
    if base.is_empty() {
        return Err(DavError::configuration("WebDAV URL is empty"));
    }

    let (scheme, rest) = base
        .split_once("://")
        .ok_or_else(|| DavError::configuration(format!("WebDAV URL '{}' is not absolute", base)))?;

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(DavError::configuration(format!("WebDAV URL '{}' has no host", base)));
    }

    Ok(format!("{}://{}/", scheme, segments.join("/")))
}

fn folder_segments(folder: &str) -> String {
    folder
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_target() {
        let url = build_target_url("https://dav.example.com/files/", "/Photos", "image_1_host.png").unwrap();
        assert_eq!(url, "https://dav.example.com/files/Photos/image_1_host.png");
    }

    #[test]
    fn test_root_folder() {
        let url = build_target_url("https://dav.example.com/files", "/", "a.jpg").unwrap();
        assert_eq!(url, "https://dav.example.com/files/a.jpg");

        let url = build_target_url("https://dav.example.com", "", "a.jpg").unwrap();
        assert_eq!(url, "https://dav.example.com/a.jpg");
    }

    #[test]
    fn test_folder_forms_are_equivalent() {
        let expected = build_target_url("https://dav.example.com/", "a", "x.jpg").unwrap();
        for folder in ["/a/", "a/", "/a", "//a//"] {
            assert_eq!(build_target_url("https://dav.example.com/", folder, "x.jpg").unwrap(), expected);
        }
    }

    #[test]
    fn test_nested_folder_keeps_separators() {
        let url = build_target_url("https://dav.example.com/remote.php/dav/", "/seg1/seg2/", "x.jpg").unwrap();
        assert_eq!(url, "https://dav.example.com/remote.php/dav/seg1/seg2/x.jpg");
    }

    #[test]
    fn test_filename_is_encoded() {
        let url = build_target_url("https://dav.example.com/", "/", "my photo#1/a.jpg").unwrap();
        assert_eq!(url, "https://dav.example.com/my%20photo%231%2Fa.jpg");
    }

    #[test]
    fn test_no_double_slashes() {
        let url = build_target_url("https://dav.example.com//files///", "//Photos//2024/", "a.jpg").unwrap();
        let path = url.trim_start_matches("https://");
        assert!(!path.contains("//"));
        assert_eq!(url, "https://dav.example.com/files/Photos/2024/a.jpg");
    }

    #[test]
    fn test_normalize_base_is_idempotent() {
        let once = normalize_base("http://localhost:8080/dav").unwrap();
        assert_eq!(once, "http://localhost:8080/dav/");
        assert_eq!(normalize_base(&once).unwrap(), once);
    }

    #[test]
    fn test_invalid_base() {
        assert!(build_target_url("", "/", "a.jpg").is_err());
        assert!(build_target_url("dav.example.com/files", "/", "a.jpg").is_err());
        assert!(build_target_url("https://", "/", "a.jpg").is_err());
    }
}
