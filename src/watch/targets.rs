//! Watch-target registry.

use crate::config::SiteConfig;
use rustc_hash::FxHashSet;
use std::path::PathBuf;

/// A directory registered for change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub recursive: bool,
}

/// Deduplicated, insertion-ordered set of directories to watch.
/// Duplicate paths would trigger multiple rebuilds for one change.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: Vec<WatchTarget>,
    seen: FxHashSet<PathBuf>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory; duplicates keep their first registration.
    pub fn add(&mut self, path: impl Into<PathBuf>, recursive: bool) {
        let path = path.into();
        if self.seen.insert(path.clone()) {
            self.targets.push(WatchTarget { path, recursive });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchTarget> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

/// Build the registry from configuration: source and theme trees, the
/// output directory, and the config file's parent. The parent is watched
/// non-recursively because the watch primitive only takes directories;
/// sibling events are filtered out later by exact path comparison.
pub fn collect_targets(config: &SiteConfig) -> TargetRegistry {
    let mut registry = TargetRegistry::new();
    for dir in config.watch.sources.iter().chain(config.watch.themes.iter()) {
        registry.add(dir.clone(), true);
    }
    registry.add(config.build.output.clone(), true);
    if let Some(dir) = config.config_path.parent() {
        registry.add(dir.to_path_buf(), false);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_ignored() {
        let mut registry = TargetRegistry::new();
        registry.add("/site/content", true);
        registry.add("/site/content", true);
        registry.add("/site/content", false);
        assert_eq!(registry.len(), 1);
        assert!(registry.iter().next().unwrap().recursive);
    }

    #[test]
    fn test_collect_includes_output_and_config_dir() {
        let mut config = SiteConfig::parse(
            "[watch]\nsources = [\"/site/content\", \"/site/templates\"]\nthemes = [\"/themes/a\"]\n",
        )
        .unwrap();
        config.build.output = PathBuf::from("/site/output");
        config.config_path = PathBuf::from("/site/site.toml");

        let registry = collect_targets(&config);
        let paths: Vec<_> = registry.iter().map(|t| t.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/site/content"),
                PathBuf::from("/site/templates"),
                PathBuf::from("/themes/a"),
                PathBuf::from("/site/output"),
                PathBuf::from("/site"),
            ]
        );
        // Only the config file's parent is non-recursive.
        let flags: Vec<_> = registry.iter().map(|t| t.recursive).collect();
        assert_eq!(flags, vec![true, true, true, true, false]);
    }

    #[test]
    fn test_collect_dedupes_source_listed_twice() {
        let mut config =
            SiteConfig::parse("[watch]\nsources = [\"/site/content\", \"/site/content\"]\n")
                .unwrap();
        config.build.output = PathBuf::from("/site/output");
        config.config_path = PathBuf::from("/site/site.toml");
        let registry = collect_targets(&config);
        assert_eq!(registry.len(), 3);
    }
}
