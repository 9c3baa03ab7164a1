use url::Url;

pub trait UrlExt {
    fn with_path(&self, path: &str) -> Url;
}

impl UrlExt for Url {
    #[inline]
    fn with_path(&self, path: &str) -> Url {
        let mut out = self.clone();
        out.set_path(path);
        out
    }
}

/// Truncate to at most `max_chars` characters, appending `…` when anything was cut.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &value[..idx]),
        None => value.to_string(),
    }
}
