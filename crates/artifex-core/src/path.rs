// SPDX-License-Identifier: BUSL-1.1
//! # Path Hashing
//!
//! Artifacts advertise the paths they can answer queries for as a set of
//! hashed paths ([`PathHash`]). A published artifact indexes every file it
//! was built from, the directory containing each file, and for package
//! initialisers (`__init__.*`) the grandparent directory as well, so that a
//! query for the package directory's parent resolves to the artifact.
//!
//! A query for a path is covered when the path itself or any of its
//! ancestor directories is in the set. Paths are unix-style; clients
//! normalise platform paths before they reach this module.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable 64-bit hash of a normalised path.
///
/// Derived from the SHA-256 digest so that server and client processes
/// (possibly different builds) agree on the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathHash(u64);

impl PathHash {
    pub fn of(path: &str) -> Self {
        let digest = Sha256::digest(path.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Normalise a path for lookup.
///
/// Paths under `/windows/` come from case-insensitive filesystems and are
/// lower-cased. A trailing slash is dropped (except for the root).
pub fn normalize(path: &str) -> String {
    let mut out = if path.starts_with("/windows/") {
        path.to_lowercase()
    } else {
        path.to_string()
    };
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Parent directory of a unix-style path, or `None` for the root and for
/// relative names without a directory component.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// The path itself followed by each ancestor directory up to the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |p| parent(p))
}

/// Whether the final path component is a package initialiser (`__init__.py`,
/// `__init__.pyi`, ...).
pub fn is_package_init(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name == "__init__" || name.starts_with("__init__.")
}

/// Compute the indexed path set for a list of files.
pub fn indexed_path_hashes<I, S>(files: I) -> BTreeSet<PathHash>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hashes = BTreeSet::new();
    for file in files {
        let file = normalize(file.as_ref());
        hashes.insert(PathHash::of(&file));
        if let Some(dir) = parent(&file) {
            hashes.insert(PathHash::of(dir));
            if is_package_init(&file) {
                if let Some(grandparent) = parent(dir) {
                    hashes.insert(PathHash::of(grandparent));
                }
            }
        }
    }
    hashes
}

/// Whether `hashes` covers `path` or one of its ancestors.
pub fn covers(hashes: &BTreeSet<PathHash>, path: &str) -> bool {
    let path = normalize(path);
    let mut chain = ancestors(&path);
    chain.any(|p| hashes.contains(&PathHash::of(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parent_walks_to_root() {
        assert_eq!(parent("/a/b/c.py"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(parent("relative.py"), None);
        assert_eq!(parent("/a/b/"), Some("/a"));
    }

    #[test]
    fn ancestors_include_the_path_itself() {
        let all: Vec<&str> = ancestors("/a/b/c.py").collect();
        assert_eq!(all, vec!["/a/b/c.py", "/a/b", "/a", "/"]);
    }

    #[test]
    fn normalize_lowercases_windows_paths_only() {
        assert_eq!(normalize("/windows/C/Users/Me/A.py"), "/windows/c/users/me/a.py");
        assert_eq!(normalize("/home/Me/A.py"), "/home/Me/A.py");
        assert_eq!(normalize("/home/me/"), "/home/me");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn package_init_adds_grandparent() {
        let hashes = indexed_path_hashes(["/proj/pkg/sub/__init__.py"]);
        assert!(hashes.contains(&PathHash::of("/proj/pkg/sub/__init__.py")));
        assert!(hashes.contains(&PathHash::of("/proj/pkg/sub")));
        assert!(hashes.contains(&PathHash::of("/proj/pkg")));
        assert_eq!(hashes.len(), 3);

        let plain = indexed_path_hashes(["/proj/pkg/sub/mod.py"]);
        assert!(!plain.contains(&PathHash::of("/proj/pkg")));
        assert_eq!(plain.len(), 2);
    }

    #[test]
    fn covers_sibling_and_directory_queries() {
        let hashes = indexed_path_hashes(["/proj/a.py", "/proj/b.py"]);
        assert!(covers(&hashes, "/proj/a.py"));
        assert!(covers(&hashes, "/proj/new_file.py"));
        assert!(covers(&hashes, "/proj"));
        assert!(covers(&hashes, "/proj/"));
        assert!(!covers(&hashes, "/other/a.py"));
        assert!(!covers(&hashes, "/"));
    }

    #[test]
    fn covers_matches_windows_paths_case_insensitively() {
        let hashes = indexed_path_hashes([normalize("/windows/C/Proj/A.py").as_str()]);
        assert!(covers(&hashes, "/windows/c/proj/a.py"));
        assert!(covers(&hashes, "/windows/C/PROJ/other.py"));
        assert!(!covers(&hashes, "/home/C/Proj/A.py"));
    }

    #[test]
    fn identical_file_sets_hash_identically() {
        let a = indexed_path_hashes(["/p/x.py", "/p/y.py"]);
        let b = indexed_path_hashes(["/p/y.py", "/p/x.py"]);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn indexed_file_covers_itself_and_its_directory_tree(
            segments in proptest::collection::vec("[a-z]{1,6}", 1..5),
            leaf in "[a-z]{1,8}\\.py",
            child in "[a-z]{1,8}",
        ) {
            let dir = format!("/{}", segments.join("/"));
            let file = format!("{dir}/{leaf}");
            let hashes = indexed_path_hashes([file.as_str()]);
            prop_assert!(covers(&hashes, &file));
            prop_assert!(covers(&hashes, &dir));
            let nested = format!("{dir}/{child}/deeper.py");
            prop_assert!(covers(&hashes, &nested));
        }
    }
}
