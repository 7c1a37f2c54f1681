use crate::report::Dependencies;
use ignore::WalkBuilder;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Finds the source files an analyzer depends on.
#[derive(Debug, Clone)]
pub struct SourceDiscovery {
    context: PathBuf,
    extensions: Vec<String>,
    ignore_patterns: Vec<String>,
}

impl SourceDiscovery {
    pub fn new<I, S>(context: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            context: context.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            ignore_patterns: vec!["node_modules".to_string(), ".git".to_string()],
        }
    }

    pub fn discover(&self) -> Dependencies {
        let mut dependencies = Dependencies {
            extensions: self.extensions.iter().cloned().collect(),
            ..Default::default()
        };
        dependencies.dirs.insert(self.context.clone());
        for pattern in &self.ignore_patterns {
            if !pattern.contains('*') {
                dependencies.excluded.insert(self.context.join(pattern));
            }
        }

        let patterns = self.ignore_patterns.clone();
        let mut walker_builder = WalkBuilder::new(&self.context);
        walker_builder
            .standard_filters(true)  // .gitignore, .ignore and hidden files
            .hidden(false)
            .filter_entry(move |entry| !should_ignore(&patterns, entry.path()));

        for result in walker_builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_some_and(|t| t.is_file()) && self.is_source_file(path) {
                dependencies.files.insert(path.to_path_buf());
            }
        }

        dependencies
    }

    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        should_ignore(&self.ignore_patterns, path)
    }
}

fn should_ignore(patterns: &[String], path: &Path) -> bool {
    let path_str = path.to_string_lossy();

    for pattern in patterns {
        // Handle simple glob patterns (*.ext)
        if let Some(ext) = pattern.strip_prefix("*.") {
            if let Some(filename) = path.file_name() {
                if filename.to_string_lossy().ends_with(&format!(".{}", ext)) {
                    return true;
                }
            }
        } else if pattern.contains('*') {
            let regex_pattern = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
            if let Ok(re) = regex::Regex::new(&regex_pattern) {
                if re.is_match(&path_str) {
                    return true;
                }
                if let Some(filename) = path.file_name() {
                    if re.is_match(&filename.to_string_lossy()) {
                        return true;
                    }
                }
            }
        } else {
            // Directory or file names match any path component
            for component in path.components() {
                if component.as_os_str().to_string_lossy() == *pattern {
                    return true;
                }
            }
        }
    }

    false
}

/// Resolves a tool the way npm scripts do: the project's local
/// `node_modules/.bin` first, then `PATH`.
pub fn locate_executable(command: &str, context: &Path) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            context.join(candidate)
        };
        return resolved.is_file().then_some(resolved);
    }

    let local = context.join("node_modules").join(".bin").join(command);
    if local.is_file() {
        return Some(local);
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|path| path.is_file())
}
