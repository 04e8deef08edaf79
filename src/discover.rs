//! Script discovery.
//!
//! Walks a directory tree and returns every file whose extension maps to a
//! known [`ScriptKind`], skipping anything matched by an exclusion glob.
//! Results are sorted by relative path so that downstream reports are stable
//! across runs.

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use glob::{MatchOptions, Pattern};
use ignore::WalkBuilder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::script::{ScriptKind, ScriptUnit};

/// Errors that abort a run before any script is processed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiscoveryError {
    /// The root path does not exist.
    #[error("root path does not exist: {path}")]
    MissingRoot {
        /// Path supplied by the caller.
        path: Utf8PathBuf,
    },
    /// The root path exists but is not a directory.
    #[error("root path is not a directory: {path}")]
    NotADirectory {
        /// Path supplied by the caller.
        path: Utf8PathBuf,
    },
    /// The root directory could not be opened or resolved.
    #[error("root path is not readable: {path}: {message}")]
    Unreadable {
        /// Path supplied by the caller.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// An exclusion pattern is not a valid glob.
    #[error("invalid exclusion pattern `{pattern}`: {message}")]
    InvalidPattern {
        /// Pattern as supplied.
        pattern: String,
        /// Parser error message.
        message: String,
    },
    /// A configured extension does not map to a supported dialect.
    #[error("unsupported script extension `{extension}` (supported: {supported})")]
    UnsupportedExtension {
        /// Extension as supplied.
        extension: String,
        /// Comma-separated list of supported extensions.
        supported: String,
    },
}

/// Compiled exclusion globs, matched against `/`-separated relative paths.
///
/// A pattern containing a `/` must match the whole relative path; a pattern
/// without one also matches any single path component, so `vendor` excludes
/// `a/vendor/b.sh` and `*.Tests.ps1` excludes test scripts at any depth.
#[derive(Clone, Debug, Default)]
pub struct ExclusionSet {
    patterns: Vec<Pattern>,
}

impl ExclusionSet {
    /// Compiles the supplied glob patterns, ignoring blank entries.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidPattern`] for a malformed glob.
    pub fn new<I, S>(patterns: I) -> Result<Self, DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for raw in patterns {
            let trimmed = raw.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            let pattern = Pattern::new(trimmed).map_err(|err| DiscoveryError::InvalidPattern {
                pattern: trimmed.to_owned(),
                message: err.to_string(),
            })?;
            compiled.push(pattern);
        }
        Ok(Self { patterns: compiled })
    }

    /// Returns `true` when `relative` matches any exclusion.
    #[must_use]
    pub fn is_excluded(&self, relative: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.patterns.iter().any(|pattern| {
            pattern.matches_with(relative, options)
                || (!pattern.as_str().contains('/')
                    && relative
                        .split('/')
                        .any(|component| pattern.matches_with(component, options)))
        })
    }
}

/// Inputs controlling a discovery walk.
#[derive(Clone, Debug)]
pub struct DiscoveryOptions {
    exclusions: ExclusionSet,
    extensions: BTreeSet<String>,
}

impl DiscoveryOptions {
    /// Builds discovery options from exclusion globs and script extensions.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidPattern`] for a malformed glob and
    /// [`DiscoveryError::UnsupportedExtension`] for an extension that does not
    /// map to a [`ScriptKind`].
    pub fn new<I, S, E, T>(exclude: I, extensions: E) -> Result<Self, DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        E: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let exclusions = ExclusionSet::new(exclude)?;
        let mut accepted = BTreeSet::new();
        for raw in extensions {
            let normalised = raw.as_ref().trim().trim_start_matches('.').to_ascii_lowercase();
            if normalised.is_empty() {
                continue;
            }
            if ScriptKind::from_extension(&normalised).is_none() {
                return Err(DiscoveryError::UnsupportedExtension {
                    extension: normalised,
                    supported: ScriptKind::KNOWN_EXTENSIONS.join(", "),
                });
            }
            accepted.insert(normalised);
        }
        Ok(Self {
            exclusions,
            extensions: accepted,
        })
    }

    fn kind_for(&self, path: &Utf8Path) -> Option<ScriptKind> {
        let extension = path.extension()?.to_ascii_lowercase();
        if !self.extensions.contains(&extension) {
            return None;
        }
        ScriptKind::from_extension(&extension)
    }
}

/// Discovers scripts under `root`.
///
/// Symlinks are followed with loop detection; a cycle is logged and skipped.
/// Hidden files and directories are ignored, as are paths that are not valid
/// UTF-8. An empty result is not an error.
///
/// # Errors
///
/// Returns [`DiscoveryError`] when the root is missing, not a directory, or
/// unreadable.
pub fn discover(
    root: &Utf8Path,
    options: &DiscoveryOptions,
) -> Result<Vec<ScriptUnit>, DiscoveryError> {
    let resolved = resolve_root(root)?;
    let exclusions = Arc::new(options.exclusions.clone());
    let filter_root = resolved.clone();

    let walker = WalkBuilder::new(resolved.as_std_path())
        .standard_filters(false)
        .hidden(true)
        .follow_links(true)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            relative_path(&filter_root, entry.path())
                .is_none_or(|relative| !exclusions.is_excluded(&relative))
        })
        .build();

    let mut scripts = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %resolved, error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|file_type| file_type.is_file()) {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 path");
            continue;
        };
        let Some(kind) = options.kind_for(path) else {
            continue;
        };
        let Some(relative) = relative_path(&resolved, entry.path()) else {
            continue;
        };
        debug!(script = %relative, kind = kind.label(), "discovered script");
        scripts.push(ScriptUnit::new(path.to_path_buf(), relative, kind));
    }

    scripts.sort_by(|left, right| left.relative_path().cmp(right.relative_path()));
    scripts.dedup_by(|left, right| left.relative_path() == right.relative_path());
    Ok(scripts)
}

fn resolve_root(root: &Utf8Path) -> Result<Utf8PathBuf, DiscoveryError> {
    let metadata = match root.metadata() {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(DiscoveryError::MissingRoot {
                path: root.to_path_buf(),
            });
        }
        Err(err) => return Err(unreadable(root, &err)),
    };
    if !metadata.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(|err| unreadable(root, &err))?;
    dir.entries().map_err(|err| unreadable(root, &err))?;
    root.canonicalize_utf8().map_err(|err| unreadable(root, &err))
}

fn unreadable(root: &Utf8Path, err: &io::Error) -> DiscoveryError {
    DiscoveryError::Unreadable {
        path: root.to_path_buf(),
        message: err.to_string(),
    }
}

fn relative_path(root: &Utf8Path, path: &std::path::Path) -> Option<String> {
    let stripped = path.strip_prefix(root.as_std_path()).ok()?;
    let parts = stripped
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Tree {
        root: Utf8PathBuf,
        _tmp: TempDir,
    }

    impl Tree {
        fn write(&self, relative: &str, contents: &str) {
            let path = self.root.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .unwrap_or_else(|err| panic!("create {parent}: {err}"));
            }
            std::fs::write(&path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
        }
    }

    #[fixture]
    fn tree() -> Tree {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non UTF-8 tempdir: {}", path.display()));
        Tree { root, _tmp: tmp }
    }

    fn options(exclude: &[&str]) -> DiscoveryOptions {
        DiscoveryOptions::new(exclude.iter().copied(), ["sh", "ps1"])
            .unwrap_or_else(|err| panic!("options: {err}"))
    }

    fn relative_paths(scripts: &[ScriptUnit]) -> Vec<&str> {
        scripts.iter().map(ScriptUnit::relative_path).collect()
    }

    #[rstest]
    fn discovers_scripts_sorted_by_relative_path(tree: Tree) {
        tree.write("z.sh", "echo z");
        tree.write("a/b.ps1", "Write-Host b");
        tree.write("a/readme.md", "# docs");
        tree.write("a.sh", "echo a");

        let scripts = discover(&tree.root, &options(&[])).unwrap_or_else(|err| panic!("{err}"));

        assert_eq!(relative_paths(&scripts), ["a.sh", "a/b.ps1", "z.sh"]);
        assert_eq!(scripts.get(1).map(ScriptUnit::kind), Some(ScriptKind::PowerShell));
    }

    #[rstest]
    fn exclusion_patterns_filter_paths_and_components(tree: Tree) {
        tree.write("keep.sh", "echo keep");
        tree.write("vendor/lib.sh", "echo vendored");
        tree.write("nested/vendor/lib.sh", "echo vendored");
        tree.write("tests/unit.sh", "echo test");
        tree.write("build/Setup.Tests.ps1", "Describe 'x' {}");

        let scripts = discover(
            &tree.root,
            &options(&["vendor", "tests/**", "*.Tests.ps1"]),
        )
        .unwrap_or_else(|err| panic!("{err}"));

        assert_eq!(relative_paths(&scripts), ["keep.sh"]);
    }

    #[rstest]
    fn empty_tree_is_not_an_error(tree: Tree) {
        let scripts = discover(&tree.root, &options(&[])).unwrap_or_else(|err| panic!("{err}"));
        assert!(scripts.is_empty());
    }

    #[rstest]
    fn hidden_directories_are_skipped(tree: Tree) {
        tree.write(".git/hooks/pre-commit.sh", "exit 0");
        tree.write("run.sh", "echo run");

        let scripts = discover(&tree.root, &options(&[])).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(relative_paths(&scripts), ["run.sh"]);
    }

    #[cfg(unix)]
    #[rstest]
    fn symlink_cycles_do_not_hang_discovery(tree: Tree) {
        tree.write("loop/inner.sh", "echo inner");
        std::os::unix::fs::symlink(&tree.root, tree.root.join("loop/back"))
            .unwrap_or_else(|err| panic!("symlink: {err}"));

        let scripts = discover(&tree.root, &options(&[])).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(relative_paths(&scripts), ["loop/inner.sh"]);
    }

    #[rstest]
    fn missing_root_is_fatal(tree: Tree) {
        let missing = tree.root.join("absent");
        let err = discover(&missing, &options(&[])).expect_err("missing root should fail");
        assert_eq!(err, DiscoveryError::MissingRoot { path: missing });
    }

    #[rstest]
    fn file_root_is_rejected(tree: Tree) {
        tree.write("single.sh", "echo");
        let file = tree.root.join("single.sh");
        let err = discover(&file, &options(&[])).expect_err("file root should fail");
        assert_eq!(err, DiscoveryError::NotADirectory { path: file });
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        let err = ExclusionSet::new(["[unclosed"]).expect_err("pattern should fail");
        assert!(matches!(err, DiscoveryError::InvalidPattern { ref pattern, .. } if pattern == "[unclosed"));
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let err = DiscoveryOptions::new(Vec::<String>::new(), ["py"])
            .expect_err("python is not a supported dialect");
        assert!(matches!(err, DiscoveryError::UnsupportedExtension { ref extension, .. } if extension == "py"));
    }
}
