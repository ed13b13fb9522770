// SPDX-License-Identifier: BUSL-1.1
//! Languages an artifact can be built for. Builders and loaders are
//! registered per language in a [`crate::Registry`].

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
    JavaScript,
    /// Files with no recognised extension. Nothing is registered for this
    /// variant by default, so such requests fail with a "no builder" error.
    Unknown,
}

impl Language {
    /// All concrete languages (excludes [`Language::Unknown`]).
    pub const ALL: [Language; 3] = [Language::Python, Language::Go, Language::JavaScript];

    /// Classify a path by its extension.
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let ext = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return Self::Unknown,
        };
        match ext.as_str() {
            "py" | "pyi" | "pyw" => Self::Python,
            "go" => Self::Go,
            "js" | "jsx" | "mjs" | "cjs" | "vue" => Self::JavaScript,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Go => "go",
            Self::JavaScript => "javascript",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
