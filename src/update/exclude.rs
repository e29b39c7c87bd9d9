//! Exclusion globs for update payload entries.
//!
//! Patterns are matched against an entry's name relative to the install root,
//! with `/` as separator. `*` also matches across `/`, so `*.log` excludes
//! both `app.log` and `logs/today.log`. Any match excludes; order is
//! irrelevant.

use crate::core::ServiceError;
use anyhow::Result;
use glob::Pattern;

/// A compiled set of exclusion globs.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<Pattern>,
}

impl ExclusionSet {
    /// Compile every pattern, failing on the first invalid one.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                Pattern::new(raw).map_err(|e| ServiceError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
        })
    }

    /// Whether `name` matches any pattern.
    pub fn is_excluded(&self, name: &str) -> bool {
        let name = name.replace('\\', "/");
        self.patterns.iter().any(|pattern| pattern.matches(&name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_glob_crosses_directories() {
        let set = ExclusionSet::new(&["*.log"]).unwrap();
        assert!(set.is_excluded("a.log"));
        assert!(set.is_excluded("b/skip.log"));
        assert!(!set.is_excluded("b/keep.txt"));
    }

    #[test]
    fn test_any_match_excludes() {
        let set = ExclusionSet::new(&["conf/*", "data.db", "cache/??"]).unwrap();
        assert!(set.is_excluded("conf/app.toml"));
        assert!(set.is_excluded("data.db"));
        assert!(set.is_excluded("cache/ab"));
        assert!(!set.is_excluded("cache/abc"));
        assert!(!set.is_excluded("bin/app"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_backslash_names_are_normalized() {
        let set = ExclusionSet::new(&["conf/*"]).unwrap();
        assert!(set.is_excluded("conf\\app.toml"));
    }

    #[test]
    fn test_empty_set_excludes_nothing() {
        let set = ExclusionSet::new::<&str>(&[]).unwrap();
        assert!(set.is_empty());
        assert!(!set.is_excluded("anything"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ExclusionSet::new(&["ok", "[oops"]).unwrap_err();
        match err.downcast_ref::<ServiceError>() {
            Some(ServiceError::InvalidPattern { pattern, .. }) => assert_eq!(pattern, "[oops"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
