//! Multi-file configuration loading.

use std::path::Path;

use indexmap::IndexMap;

use crate::config::{ConfigPath, GlobalConfig, MetricsConfig, interpolate, is_yaml_file};
use crate::error::ConfigError;

/// Trait for configs that can be merged from multiple files.
///
/// Each file contributes named components (pipelines); keys must be unique
/// across all files. Global and metrics sections merge last-write-wins.
pub trait Mergeable: Sized + Default {
    type Key: Eq + std::hash::Hash + Clone + std::fmt::Display;
    type Component;

    fn components(&self) -> &IndexMap<Self::Key, Self::Component>;
    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component>;
    fn global_mut(&mut self) -> &mut GlobalConfig;
    fn metrics_mut(&mut self) -> &mut MetricsConfig;
    fn parse_yaml(contents: &str) -> Result<Self, ConfigError>;

    fn merge(&mut self, mut other: Self) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .components()
            .keys()
            .filter(|key| self.components().contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateComponents { keys: duplicates });
        }

        for (key, component) in other.components_mut().drain(..) {
            self.components_mut().insert(key, component);
        }

        self.global_mut()
            .merge_from(std::mem::take(other.global_mut()));
        self.metrics_mut()
            .merge_from(std::mem::take(other.metrics_mut()));
        Ok(())
    }
}

/// Load and merge every config source, collecting all per-file errors.
pub fn load_from_paths<C: Mergeable>(paths: &[ConfigPath]) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    for path in paths {
        let (display, loaded) = match path {
            ConfigPath::File(file_path) => (file_path.display(), load_file::<C>(file_path)),
            ConfigPath::Dir(dir_path) => (dir_path.display(), load_dir::<C>(dir_path)),
        };

        match loaded.and_then(|partial| config.merge(partial)) {
            Ok(()) => {}
            Err(e) => errors.push(format!("{display}: {e}")),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

fn load_file<C: Mergeable>(path: &Path) -> Result<C, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    C::parse_yaml(&result.text)
}

fn load_dir<C: Mergeable>(dir: &Path) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();

    // Lexical order so numbered files (01_, 02_) load predictably
    files.sort();

    for path in files {
        match load_file::<C>(&path).and_then(|partial| config.merge(partial)) {
            Ok(()) => {}
            Err(e) => errors.push(format!("{}: {}", path.display(), e)),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}
