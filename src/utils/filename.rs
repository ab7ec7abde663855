use std::collections::HashSet;
use std::path::Path;

use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Placeholder used when neither the response headers nor the URL name a file.
pub const FALLBACK_NAME: &str = "download";

/// Reduce a client- or server-supplied name to a safe file name component.
pub fn sanitize_filename(filename: &str) -> String {
    // Only the final path component survives
    let name = Path::new(filename.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::debug!("Stripped path components from filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == '/'
                || c == '\\'
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    }
}

/// Swap the extension of `declared_name` for `suffix` (which includes the dot).
pub fn output_name(declared_name: &str, suffix: &str) -> String {
    let stem = Path::new(declared_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("converted");
    format!("{}{}", stem, suffix)
}

/// Make archive member names unique: the first occurrence keeps its name,
/// later ones become `name-2.ext`, `name-3.ext`, ...
pub fn unique_member_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut taken = HashSet::new();
    let mut result = Vec::new();

    for name in names {
        if taken.insert(name.clone()) {
            result.push(name);
            continue;
        }

        let path = Path::new(&name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&name)
            .to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let mut n = 2;
        loop {
            let candidate = format!("{}-{}{}", stem, n, ext);
            if taken.insert(candidate.clone()) {
                result.push(candidate);
                break;
            }
            n += 1;
        }
    }

    result
}

/// Extract the file name from a `Content-Disposition` header value.
/// `filename*` (RFC 5987) wins over plain `filename`.
pub fn from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;

    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "filename*" {
            // charset'lang'percent-encoded
            let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
            let decoded = percent_decode_str(encoded.trim_matches('"'))
                .decode_utf8_lossy()
                .into_owned();
            if !decoded.is_empty() {
                return Some(decoded);
            }
        } else if key == "filename" {
            let value = value.trim_matches('"');
            if !value.is_empty() {
                plain = Some(value.to_string());
            }
        }
    }

    plain
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn from_url_path(url: &url::Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
}

/// `attachment` disposition for a download. Non-ASCII names also get an
/// RFC 5987 `filename*` parameter.
pub fn attachment_disposition(filename: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .collect::<String>();

    if ascii_filename == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let fallback = if ascii_filename.is_empty() {
        "file"
    } else {
        &ascii_filename
    };
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.csv"), "report.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a:b*c?.csv"), "a_b_c_.csv");
        assert_eq!(sanitize_filename(""), FALLBACK_NAME);
        assert_eq!(sanitize_filename("données.csv"), "données.csv");
    }

    #[test]
    fn test_output_name_swaps_suffix() {
        assert_eq!(output_name("sales.parquet", ".csv"), "sales.csv");
        assert_eq!(output_name("events", ".csv"), "events.csv");
        assert_eq!(output_name("archive.v2.csv", ".ndjson"), "archive.v2.ndjson");
    }

    #[test]
    fn test_unique_member_names() {
        let names = unique_member_names(vec![
            "data.csv".to_string(),
            "other.csv".to_string(),
            "data.csv".to_string(),
            "data.csv".to_string(),
        ]);
        assert_eq!(names, vec!["data.csv", "other.csv", "data-2.csv", "data-3.csv"]);
    }

    #[test]
    fn test_unique_member_names_skips_taken_candidates() {
        let names = unique_member_names(vec![
            "data-2.csv".to_string(),
            "data.csv".to_string(),
            "data.csv".to_string(),
        ]);
        assert_eq!(names, vec!["data-2.csv", "data.csv", "data-3.csv"]);
    }

    #[test]
    fn test_content_disposition_parsing() {
        assert_eq!(
            from_content_disposition("attachment; filename=\"remote.parquet\"").as_deref(),
            Some("remote.parquet")
        );
        assert_eq!(
            from_content_disposition(
                "attachment; filename=\"fallback.csv\"; filename*=UTF-8''r%C3%A9sum%C3%A9.csv"
            )
            .as_deref(),
            Some("résumé.csv")
        );
        assert_eq!(from_content_disposition("inline"), None);
    }

    #[test]
    fn test_url_path_name() {
        let url = url::Url::parse("https://host.test/data/my%20file.csv?x=1").unwrap();
        assert_eq!(from_url_path(&url).as_deref(), Some("my file.csv"));

        let url = url::Url::parse("https://host.test/exports/").unwrap();
        assert_eq!(from_url_path(&url).as_deref(), Some("exports"));

        let url = url::Url::parse("https://host.test/").unwrap();
        assert_eq!(from_url_path(&url), None);
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("sales.csv"),
            "attachment; filename=\"sales.csv\""
        );
        let value = attachment_disposition("résumé.csv");
        assert!(value.starts_with("attachment; filename=\"rsum.csv\""));
        assert!(value.contains("filename*=UTF-8''r%C3%A9sum%C3%A9%2Ecsv"));
    }
}
