//! Helpers over normalized absolute paths.
//!
//! Every path handled by the filesystem is an absolute `/`-separated string
//! with no trailing slash and no `.`/`..` components; `/` itself is the only
//! path that ends with a separator. Callers are responsible for normalizing
//! before handing a path in.

/// Parent of a normalized absolute path. `dirname("/")` is `/`.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

/// Final component of a normalized absolute path. `basename("/")` is empty.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Whether `path` is `ancestor` itself or lives below it. The trailing
/// slash on both sides keeps sibling names sharing a prefix (`/ab` vs
/// `/abc`) from matching. Only meaningful for normalized paths.
pub fn is_ancestor_path(ancestor: &str, path: &str) -> bool {
    format!("{}/", path).starts_with(&format!("{}/", ancestor))
}
