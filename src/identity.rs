use std::path::{Component, Path};

use md5::{Digest, Md5};
use uuid::Uuid;

use crate::frontmatter::HeaderFields;

/// Identity of a note file.
///
/// An explicit `uid` (or the legacy `id`) wins when it parses as a UUID.
/// Otherwise the id is the MD5 digest of the root-relative path, so the same
/// unsaved file keeps the same id across scans. Renaming such a file outside
/// the app changes its id; any save writes `uid` and pins it from then on.
pub fn resolve(fields: &HeaderFields, relative_path: &str) -> Uuid {
    explicit_id(fields).unwrap_or_else(|| derived_id(relative_path))
}

pub fn explicit_id(fields: &HeaderFields) -> Option<Uuid> {
    [fields.uid.as_deref(), fields.id.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|raw| Uuid::parse_str(raw.trim()).ok())
}

pub fn derived_id(relative_path: &str) -> Uuid {
    let digest = Md5::digest(relative_path.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Uuid::from_bytes(bytes)
}

/// `/Notebook/Title.md` style path of `path` below `root`, with `/`
/// separators on every platform.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for component in relative.components() {
        if let Component::Normal(name) = component {
            out.push('/');
            out.push_str(&name.to_string_lossy());
        }
    }
    out
}
