// SPDX-License-Identifier: BUSL-1.1
//! # Per-language strategy registry
//!
//! Builders and loaders are registered per [`Language`] on a [`Registry`]
//! built once at startup and handed to the worker and the client. There is
//! no global registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::build::Builder;
use crate::language::Language;
use crate::load::Loader;

#[derive(Clone, Default)]
pub struct Registry {
    builders: HashMap<Language, Arc<dyn Builder>>,
    loaders: HashMap<Language, Arc<dyn Loader>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builder(mut self, language: Language, builder: Arc<dyn Builder>) -> Self {
        self.builders.insert(language, builder);
        self
    }

    pub fn with_loader(mut self, language: Language, loader: Arc<dyn Loader>) -> Self {
        self.loaders.insert(language, loader);
        self
    }

    pub fn builder(&self, language: Language) -> Option<Arc<dyn Builder>> {
        self.builders.get(&language).cloned()
    }

    pub fn loader(&self, language: Language) -> Option<Arc<dyn Loader>> {
        self.loaders.get(&language).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builders: Vec<_> = self.builders.keys().collect();
        builders.sort();
        let mut loaders: Vec<_> = self.loaders.keys().collect();
        loaders.sort();
        f.debug_struct("Registry")
            .field("builders", &builders)
            .field("loaders", &loaders)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FileIndexBuilder, FileIndexLoader};

    #[test]
    fn lookups_are_per_language() {
        let registry = Registry::new()
            .with_builder(Language::Python, Arc::new(FileIndexBuilder::new()))
            .with_loader(Language::Python, Arc::new(FileIndexLoader));
        assert!(registry.builder(Language::Python).is_some());
        assert!(registry.loader(Language::Python).is_some());
        assert!(registry.builder(Language::Go).is_none());
        assert!(registry.loader(Language::Unknown).is_none());
        assert!(format!("{registry:?}").contains("Python"));
    }
}
