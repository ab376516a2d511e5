//! Absolute path grammar shared by every backend.
//!
//! Paths are `/`-separated byte strings: absolute, duplicate separators
//! collapsed, trailing separator stripped except for the root itself.
//! `.` and `..` components are rejected rather than resolved.

use super::{Error, Result, MAX_NAME_LEN, MAX_PATH_LEN};

/// The path separator.
pub const SEPARATOR: char = '/';

/// Normalises a path into canonical form, validating the grammar.
pub fn normalize(path: &str) -> Result<String> {
    if !path.starts_with(SEPARATOR) || path.len() > MAX_PATH_LEN {
        return Err(Error::Invalid);
    }
    let mut out = String::with_capacity(path.len());
    for component in path.split(SEPARATOR) {
        if component.is_empty() {
            continue;
        }
        validate_name(component)?;
        out.push(SEPARATOR);
        out.push_str(component);
    }
    if out.is_empty() {
        out.push(SEPARATOR);
    }
    Ok(out)
}

/// Checks that a name is usable as a single path component.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::Invalid);
    }
    if name == "." || name == ".." {
        return Err(Error::Invalid);
    }
    if name.contains(SEPARATOR) || name.contains('\0') {
        return Err(Error::Invalid);
    }
    Ok(())
}

/// Splits a normalised path into its components. The root has none.
pub fn split(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty()).collect()
}

/// Splits a normalised path into the parent path and the base name.
/// Fails with [`Error::Invalid`] for the root, which has neither.
pub fn parent_and_name(path: &str) -> Result<(String, String)> {
    let normalized = normalize(path)?;
    if normalized == "/" {
        return Err(Error::Invalid);
    }
    match normalized.rfind(SEPARATOR) {
        Some(0) => Ok(("/".to_owned(), normalized[1..].to_owned())),
        Some(at) => Ok((normalized[..at].to_owned(), normalized[at + 1..].to_owned())),
        None => Err(Error::Invalid),
    }
}

/// Joins a base path and a child name.
pub fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}
