//! Splitting URLs and paths into a directory URL and a file name
//!
//! Every transfer operation works on `(dir_url, file_name)` pairs, so the split must be exact
//! for callers that rebuild URLs from parts with [`join_url`].

use crate::notation::DependencyNotation;

/// Suffix of the staging file written next to a download target
pub const TMP_SUFFIX: &str = ".tmp";

const PROTOCOL_SEPARATOR: &str = "://";

pub fn is_url(value: &str) -> bool {
    value.contains(PROTOCOL_SEPARATOR)
}

/// Splits `scheme://host/a/b/my.jar` into `("scheme://host/a/b", "my.jar")`
///
/// Plain paths have backslashes normalized to `/` first, so `C:\a\b.jar` gives `("C:/a", "b.jar")`.
/// Values without any `/` after the scheme keep the scheme as directory: `resolve://g:n:1`
/// gives `("resolve://", "g:n:1")`.
pub fn split_url(url: &str) -> (String, String) {
    if let Some((protocol, rest)) = url.split_once(PROTOCOL_SEPARATOR) {
        return match rest.rsplit_once('/') {
            Some((dir, file)) => (
                format!("{protocol}{PROTOCOL_SEPARATOR}{dir}"),
                file.to_string(),
            ),
            None => (format!("{protocol}{PROTOCOL_SEPARATOR}"), rest.to_string()),
        };
    }
    let normalized = url.replace('\\', "/");
    match normalized.rsplit_once('/') {
        Some(("", file)) => ("/".to_string(), file.to_string()),
        Some((dir, file)) => (dir.to_string(), file.to_string()),
        None => (String::new(), normalized),
    }
}

/// Inverse of [`split_url`]
pub fn join_url(dir_url: &str, file_name: &str) -> String {
    if dir_url.is_empty() {
        file_name.to_string()
    } else if dir_url.ends_with('/') {
        format!("{dir_url}{file_name}")
    } else {
        format!("{dir_url}/{file_name}")
    }
}

/// File name a URL downloads to; notations flatten to `group_name_version.extension`
pub fn name_from_url(url: &str) -> String {
    let value = url.strip_prefix("resolve://").unwrap_or(url);
    if let Some(notation) = DependencyNotation::parse(value) {
        return notation.flat_name();
    }
    let (_, file_name) = split_url(url);
    // drop query strings and fragments of web URLs
    file_name
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// `<target>.tmp` in the same directory
pub fn tmp_path(target: &std::path::Path) -> std::path::PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    std::path::PathBuf::from(name)
}
