//! Path admission for data-plane requests.

/// Unversioned paths accepted when the config does not list its own.
pub const LEGACY_PATHS: &[&str] = &[
    "/chat/completions",
    "/completions",
    "/models",
    "/embeddings",
    "/responses",
];

/// Always forwarded, whatever the allow-list says.
pub const VERSION_PREFIX: &str = "/v1";

/// Ordered prefix rules, evaluated linearly after the traversal check.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    prefixes: Vec<String>,
}

impl PathPolicy {
    /// `allowed` replaces [`LEGACY_PATHS`] when present.
    pub fn new(allowed: Option<Vec<String>>) -> Self {
        let prefixes = match allowed {
            Some(paths) => paths
                .iter()
                .filter_map(|path| normalize_prefix(path))
                .collect(),
            None => LEGACY_PATHS.iter().map(|path| path.to_string()).collect(),
        };
        Self { prefixes }
    }

    pub fn admits(&self, path: &str) -> bool {
        if is_traversal(path) {
            return false;
        }
        if matches_prefix(path, VERSION_PREFIX) {
            return true;
        }
        self.prefixes
            .iter()
            .any(|prefix| matches_prefix(path, prefix))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self::new(None)
    }
}

/// True for paths that could escape the allow-list once resolved upstream.
pub fn is_traversal(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    path.contains("..")
        || path.contains("//")
        || path.contains('\\')
        || lowered.contains("%2e")
        || lowered.contains("%2f")
        || lowered.contains("%5c")
}

/// `path` equals `prefix` or is a slash-delimited descendant of it.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn normalize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() || is_traversal(trimmed) {
        tracing::warn!("Ignoring unusable allowed_paths entry {:?}", raw);
        return None;
    }
    if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{trimmed}"))
    }
}

/// Upstream path for an admitted request: the version prefix is dropped.
pub fn upstream_path(path: &str) -> &str {
    match path.strip_prefix(VERSION_PREFIX) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}
