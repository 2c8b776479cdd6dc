//! Guest path handling.
//!
//! Guest paths are drive-letter absolute (`c:\dir\file.ext`), compared
//! case-insensitively, with `\` as the only separator. All functions
//! here normalise to that form; host path conventions never leak in.

use karst_base::ucs2;

use crate::drive::DriveNumber;

/// True when `path` starts with `<letter>:`.
pub fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// The drive a path lives on.
pub fn drive_of(path: &str) -> Option<DriveNumber> {
    is_absolute(path)
        .then(|| DriveNumber::from_letter(path.as_bytes()[0] as char))
        .flatten()
}

/// Normalises separators and resolves `.` / `..` components.
///
/// The input must already be absolute; the result keeps the original
/// casing and always uses single backslashes with no trailing separator
/// (except for a bare drive root, which keeps it: `c:\`).
pub fn normalize(path: &str) -> String {
    let unified = path.replace('/', "\\");
    let mut parts = unified.split('\\').filter(|c| !c.is_empty());

    let Some(root) = parts.next() else {
        return String::new();
    };
    let mut stack: Vec<&str> = Vec::new();
    for part in parts {
        match part {
            "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    let mut out = String::from(root);
    if stack.is_empty() {
        out.push('\\');
    } else {
        for part in stack {
            out.push('\\');
            out.push_str(part);
        }
    }
    out
}

/// Resolves `path` against a session path.
///
/// Absolute paths are normalised as-is; root-relative paths (leading
/// `\`) take the session drive; plain relative paths append to the
/// session path. The result is idempotent: resolving an already-resolved
/// path returns it unchanged.
pub fn absolute_path(path: &str, session_path: &str) -> String {
    if is_absolute(path) {
        return normalize(path);
    }
    if let Some(rest) = path.strip_prefix('\\').or_else(|| path.strip_prefix('/')) {
        let root = root_name(session_path);
        return normalize(&format!("{root}{rest}"));
    }
    normalize(&format!("{}\\{}", session_path.trim_end_matches('\\'), path))
}

/// The `<drive>:\` prefix of an absolute path.
pub fn root_name(path: &str) -> String {
    if is_absolute(path) {
        format!("{}:\\", path.as_bytes()[0] as char)
    } else {
        String::new()
    }
}

/// The directory part of a path, with a trailing separator.
///
/// A path that is itself a directory reference (trailing `\`) is
/// returned unchanged apart from normalisation.
pub fn file_directory(path: &str) -> String {
    if path.ends_with('\\') || path.ends_with('/') {
        let norm = normalize(path);
        return if norm.ends_with('\\') {
            norm
        } else {
            format!("{norm}\\")
        };
    }
    let norm = normalize(path);
    match norm.rfind('\\') {
        Some(pos) => norm[..=pos].to_owned(),
        None => norm,
    }
}

/// The leaf name of a path.
pub fn filename(path: &str) -> String {
    let norm = normalize(path);
    match norm.rfind('\\') {
        Some(pos) => norm[pos + 1..].to_owned(),
        None => norm,
    }
}

/// Joins a directory and a leaf.
pub fn add_path(dir: &str, leaf: &str) -> String {
    format!(
        "{}\\{}",
        dir.trim_end_matches('\\'),
        leaf.trim_start_matches('\\')
    )
}

/// Case-folded form for use as a map key or comparison operand.
pub fn fold(path: &str) -> String {
    ucs2::fold_case(&normalize(path))
}

/// Case-insensitive path equality.
pub fn eq(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}
