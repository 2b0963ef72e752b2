use crate::result::{MatrixError, Result};
use crate::source::SourceTree;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One line of an exclusion list, compiled.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    negated: bool,
    dir_only: bool,
    regex: Regex,
}

/** Exclusion-list driven filter over a project directory
 *
 * # Rule Semantics
 * - `*` matches within one path component, `**` across components, `?` one character
 * - `[abc]` / `[!abc]` character classes, `\x` escapes `x`
 * - A leading `/`, or a `/` anywhere but the end, anchors the rule to the root
 * - A trailing `/` makes the rule match directories only
 * - A leading `!` re-includes what an earlier rule excluded
 * - Rules are evaluated in order and the last matching rule wins
 * - An excluded directory is not descended, so nothing inside it can be re-included
 *
 * # Example
 * ```no_run
 * use crossmatrix::source::SourceFilter;
 * use std::path::Path;
 *
 * let filter = SourceFilter::with_defaults("Cargo.toml", "Cargo.lock", &[]).unwrap();
 * let tree = filter.apply(Path::new(".")).unwrap();
 * for file in tree.files() {
 *     println!("{}", file.display());
 * }
 * ```
 */
#[derive(Debug, Clone)]
pub struct SourceFilter {
    manifest: PathBuf,
    lockfile: PathBuf,
    rules: Vec<ExclusionRule>,
}

impl ExclusionRule {
    pub fn parse(line: &str) -> Result<Self> {
        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, body),
        };

        let anchored = body.contains('/');
        let body = body.strip_prefix('/').unwrap_or(body);

        if body.is_empty() {
            return Err(MatrixError::configuration(format!(
                "exclusion pattern `{}` is empty",
                line
            )));
        }

        let translated = translate(body).map_err(|reason| {
            MatrixError::configuration(format!("exclusion pattern `{}` {}", line, reason))
        })?;

        let prefix = if anchored { "^" } else { "^(?:.*/)?" };
        let regex = Regex::new(&format!("{}{}$", prefix, translated)).map_err(|e| {
            MatrixError::configuration(format!("exclusion pattern `{}`: {}", line, e))
        })?;

        Ok(Self {
            negated,
            dir_only,
            regex,
        })
    }

    fn matches(&self, relative: &str, is_dir: bool) -> bool {
        (is_dir || !self.dir_only) && self.regex.is_match(relative)
    }
}

fn translate(glob: &str) -> std::result::Result<String, &'static str> {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                for c in chars.by_ref() {
                    match c {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    empty = false;
                }
                if !closed {
                    return Err("has an unterminated character class");
                }
                out.push(']');
            }
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => return Err("ends with a dangling escape"),
            },
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    Ok(out)
}

/// Escapes a literal path so it matches only itself inside a rule.
pub fn escape_glob(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '\\' | '*' | '?' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl SourceFilter {
    pub fn new(
        manifest: impl Into<PathBuf>,
        lockfile: impl Into<PathBuf>,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let rules = patterns
            .into_iter()
            .map(|p| ExclusionRule::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            manifest: manifest.into(),
            lockfile: lockfile.into(),
            rules,
        })
    }

    /** Canonical exclusion list for a project
     *
     * # Excludes
     * - Every lockfile but the primary one, every `*.toml` but the primary manifest
     * - Markdown, build-orchestration files, CI and VCS metadata, license texts
     * - `/target/` plus any extra root directories (the orchestrator's work and output dirs)
     *
     * Manifest, lockfile and directory names are matched literally.
     */
    pub fn default_patterns(manifest: &str, lockfile: &str, extra_dirs: &[&str]) -> Vec<String> {
        let mut patterns: Vec<String> = vec![
            "*.lock".into(),
            format!("!/{}", escape_glob(lockfile)),
            "*.toml".into(),
            format!("!/{}", escape_glob(manifest)),
            "*.md".into(),
            "*.nix".into(),
            "Dockerfile*".into(),
            "Containerfile*".into(),
            "Makefile".into(),
            "justfile".into(),
            ".git/".into(),
            ".github/".into(),
            ".gitlab-ci.yml".into(),
            ".circleci/".into(),
            ".gitignore".into(),
            ".gitattributes".into(),
            "LICENSE*".into(),
            "COPYING*".into(),
            "/target/".into(),
        ];
        patterns.extend(
            extra_dirs
                .iter()
                .map(|dir| format!("/{}/", escape_glob(dir.trim_matches('/')))),
        );
        patterns
    }

    /** Filter with the canonical exclusion list
     *
     * # Errors
     * - `MatrixError::Configuration` if a name leaves an empty rule, such as an
     *   extra directory of `/`
     */
    pub fn with_defaults(manifest: &str, lockfile: &str, extra_dirs: &[&str]) -> Result<Self> {
        Self::new(
            manifest,
            lockfile,
            Self::default_patterns(manifest, lockfile, extra_dirs),
        )
    }

    /// Appends rules after the existing ones, so they take precedence.
    pub fn extend(&mut self, patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<()> {
        for pattern in patterns {
            self.rules.push(ExclusionRule::parse(pattern.as_ref())?);
        }
        Ok(())
    }

    pub fn is_excluded(&self, relative: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(relative, is_dir))
            .is_some_and(|rule| !rule.negated)
    }

    /** Walks `root` and returns every file not excluded
     *
     * # Errors
     * - `MatrixError::Filesystem` if `root` is missing, not a directory, or unreadable
     */
    pub fn apply(&self, root: &Path) -> Result<SourceTree> {
        let metadata = std::fs::metadata(root).map_err(|e| {
            MatrixError::filesystem(format!(
                "source root {} is not readable: {}",
                root.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(MatrixError::filesystem(format!(
                "source root {} is not a directory",
                root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = relative_path(root, entry.path());
                !self.is_excluded(&relative, entry.file_type().is_dir())
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                MatrixError::filesystem(format!("failed to walk {}: {}", root.display(), e))
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }

        log::debug!(
            "source filter kept {} files under {}",
            files.len(),
            root.display()
        );

        let lockfile = files
            .contains(&self.lockfile)
            .then(|| self.lockfile.clone());

        Ok(SourceTree::new(
            root.to_path_buf(),
            self.manifest.clone(),
            lockfile,
            files,
        ))
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
