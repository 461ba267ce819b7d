use std::sync::LazyLock;

use regex::Regex;

static ILLEGAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[/\\?<>:*|"]"#).unwrap());
static SLASHES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/+").unwrap());

/// Replace characters that are illegal in file names on common filesystems with `_`.
pub fn sanitize(title: &str) -> String {
    ILLEGAL_RE.replace_all(title, "_").into_owned()
}

/// Normalize a `/`-joined vault path: unify separators, collapse runs of
/// slashes and drop leading/trailing ones.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/").replace(['\u{00A0}', '\u{202F}'], " ");
    let collapsed = SLASHES_RE.replace_all(unified.trim(), "/");
    collapsed.trim_matches('/').to_string()
}

/// Join a child onto a vault path. An empty base means the vault root.
pub fn join(base: &str, child: &str) -> String {
    let base = normalize_path(base);
    if base.is_empty() {
        normalize_path(child)
    } else {
        normalize_path(&format!("{}/{}", base, child))
    }
}
