//! URL helper functions used throughout the crawler

use url::Url;

/// Canonicalize a URL into the dedup key used by the visited set.
///
/// Lowercases scheme, host, and path; drops fragment and query. The original
/// absolute URL is kept separately for fetching.
pub fn normalize(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.set_query(None);
            let lowered = parsed.path().to_lowercase();
            parsed.set_path(&lowered);
            parsed.to_string()
        }
        Err(_) => url.to_lowercase(),
    }
}

/// Check whether a URL points at a downloadable document.
///
/// Matches a bare extension suffix or the `<ext>?` / `<ext>&` forms so that
/// `report.pdf?version=2` still classifies.
pub fn is_document(url: &str, extensions: &[String]) -> bool {
    let lower = url.to_lowercase();
    extensions.iter().any(|ext| {
        lower.ends_with(ext.as_str())
            || lower.contains(&format!("{}?", ext))
            || lower.contains(&format!("{}&", ext))
    })
}

/// Extract the extension of a document URL: last `.`-separated token with any
/// query suffix stripped.
pub fn extension_of(url: &str) -> String {
    let mut parts = url.rsplit('.');
    match parts.next() {
        Some(last) if parts.next().is_some() => {
            let ext = match last.find('?') {
                Some(idx) => &last[..idx],
                None => last,
            };
            format!(".{}", ext)
        }
        _ => String::new(),
    }
}

/// Derive the on-disk filename for a download.
///
/// Preference order: Content-Disposition attachment filename, last URL path
/// segment (query stripped), `download_<nanos>` fallback. Always sanitized.
pub fn extract_filename(doc_url: &str, content_disposition: Option<&str>) -> String {
    if let Some(cd) = content_disposition {
        if let Some(raw) = cd.strip_prefix("attachment; filename=") {
            let name = raw.trim_matches('"');
            if !name.is_empty() {
                return sanitize_filename(name);
            }
        }
    }

    let mut filename = doc_url.rsplit('/').next().unwrap_or("").to_string();
    if let Some(idx) = filename.find('?') {
        filename.truncate(idx);
    }

    if filename.is_empty() || !filename.contains('.') {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        filename = format!("download_{}", nanos);
    }

    sanitize_filename(&filename)
}

/// Replace filesystem-hostile characters and cap the length at 200 chars,
/// preserving the extension.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            other => other,
        })
        .collect();

    let char_count = sanitized.chars().count();
    if char_count > 200 {
        let ext: String = match sanitized.rfind('.') {
            Some(idx) => sanitized[idx..].to_string(),
            None => String::new(),
        };
        let keep = 200usize.saturating_sub(ext.chars().count());
        let stem: String = sanitized.chars().take(keep).collect();
        sanitized = format!("{}{}", stem, ext);
    }

    sanitized
}

/// Normalize CLI input: add https:// when the scheme is missing, rewrite
/// non-http(s) schemes to https.
pub fn normalize_seed(url: &str) -> String {
    let trimmed = url.trim();

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    if let Some((scheme, rest)) = trimmed.split_once("://") {
        if scheme != "http" && scheme != "https" {
            return format!("https://{}", rest);
        }
    }

    format!("https://{}", trimmed)
}

/// Format bytes into a human-readable string for stats output.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, ['K', 'M', 'G', 'T', 'P', 'E'][exp])
}
