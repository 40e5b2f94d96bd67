//! File scanner for discovering, filtering and categorizing source files.
//!
//! Categories steer the analysis prompt for each chunk:
//! `entry`, `api`, `data`, `config`, `tests` and `core` (everything else).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Every category the scanner assigns, in report order.
pub const CATEGORIES: [&str; 6] = ["entry", "api", "data", "config", "tests", "core"];

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["rs", "py", "js"])
    pub extensions: Vec<String>,
    /// Directory or file names to skip (e.g., ["node_modules", "target"])
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: usize,
    /// Maximum number of files to scan
    pub max_files: Option<usize>,
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
            max_files: Some(config.max_files),
        }
    }
}

/// Scanned file information.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    /// Relative path from the scanned root, with `/` separators
    pub path: String,
    /// File size in bytes
    pub size: u64,
    pub category: &'static str,
}

/// A scanned file with its content loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: String,
    pub category: &'static str,
    pub content: String,
}

/// File scanner for discovering source files.
pub struct FileScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl FileScanner {
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { config, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan for all matching files, sorted by path.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.is_dir() {
            anyhow::bail!("Not a directory: {}", self.root.display());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded_entry(entry));

        for entry in walker {
            if let Some(max) = self.config.max_files {
                if files.len() >= max {
                    debug!("Reached max_files limit of {}", max);
                    break;
                }
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches_extension(entry.path()) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    debug!("Cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if size > self.config.max_file_size as u64 {
                debug!("Skipping {} ({} bytes)", entry.path().display(), size);
                continue;
            }

            let path = relative_path(&self.root, entry.path());
            let category = categorize(&path);
            files.push(ScannedFile {
                path,
                size,
                category,
            });
        }

        Ok(files)
    }

    /// Scan and read every matching file. Unreadable or non-UTF-8 files are
    /// skipped with a warning.
    pub fn collect_files(&self) -> Result<Vec<SourceFile>> {
        let scanned = self
            .scan()
            .with_context(|| format!("Failed to scan {}", self.root.display()))?;

        let mut files = Vec::with_capacity(scanned.len());
        for file in scanned {
            match fs::read_to_string(self.root.join(&file.path)) {
                Ok(content) => files.push(SourceFile {
                    path: file.path,
                    category: file.category,
                    content,
                }),
                Err(e) => warn!("Failed to read {}: {}", file.path, e),
            }
        }

        Ok(files)
    }

    fn is_excluded_entry(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        self.is_excluded(&name)
    }

    /// Hidden names and explicit excludes.
    fn is_excluded(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return true;
        }
        self.config.excludes.iter().any(|pattern| name == pattern)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.config.extensions.iter().any(|e| e == ext)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Assign a category from path and file-name heuristics.
pub fn categorize(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    let segments: Vec<&str> = lower.split('/').collect();
    let file_name = segments.last().copied().unwrap_or("");
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (file_name, ""),
    };
    let dirs = &segments[..segments.len().saturating_sub(1)];
    let in_dir = |names: &[&str]| dirs.iter().any(|d| names.contains(d));

    if in_dir(&["test", "tests", "spec", "__tests__"])
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
    {
        return "tests";
    }

    if matches!(ext, "toml" | "yaml" | "yml" | "json" | "ini")
        || stem.contains("config")
        || stem.contains("settings")
    {
        return "config";
    }

    if matches!(
        stem,
        "main" | "index" | "app" | "lib" | "server" | "__main__" | "cli"
    ) {
        return "entry";
    }

    let api_names = ["api", "routes", "handlers", "controllers", "endpoints"];
    if in_dir(&api_names) || api_names.contains(&stem) {
        return "api";
    }

    let data_names = ["models", "schema", "db", "migrations", "entities", "repository"];
    if ext == "sql" || in_dir(&data_names) || data_names.contains(&stem) {
        return "data";
    }

    "core"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn config() -> ScanConfig {
        ScanConfig::from(&crate::config::ScannerConfig::default())
    }

    fn sample_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/main.rs", "fn main() {}");
        write(root, "src/api/routes.rs", "pub fn routes() {}");
        write(root, "src/models/user.rs", "pub struct User;");
        write(root, "src/engine.rs", "pub fn run() {}");
        write(root, "tests/engine_test.rs", "#[test] fn t() {}");
        write(root, "Cargo.toml", "[package]");
        write(root, "README.md", "# readme");
        write(root, "target/debug/build.rs", "fn main() {}");
        write(root, ".hidden/secret.rs", "fn main() {}");
        dir
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = sample_project();
        let scanner = FileScanner::new(dir.path().to_path_buf(), config());
        let paths: Vec<String> = scanner.scan().unwrap().into_iter().map(|f| f.path).collect();

        assert_eq!(
            paths,
            vec![
                "Cargo.toml",
                "src/api/routes.rs",
                "src/engine.rs",
                "src/main.rs",
                "src/models/user.rs",
                "tests/engine_test.rs",
            ]
        );
    }

    #[test]
    fn test_scan_assigns_categories() {
        let dir = sample_project();
        let scanner = FileScanner::new(dir.path().to_path_buf(), config());
        let files = scanner.scan().unwrap();
        let category = |path: &str| files.iter().find(|f| f.path == path).unwrap().category;

        assert_eq!(category("Cargo.toml"), "config");
        assert_eq!(category("src/main.rs"), "entry");
        assert_eq!(category("src/api/routes.rs"), "api");
        assert_eq!(category("src/models/user.rs"), "data");
        assert_eq!(category("src/engine.rs"), "core");
        assert_eq!(category("tests/engine_test.rs"), "tests");
    }

    #[test]
    fn test_max_files_and_size_limits() {
        let dir = sample_project();
        write(dir.path(), "src/huge.rs", &"x".repeat(2048));

        let mut limited = config();
        limited.max_files = Some(2);
        let scanner = FileScanner::new(dir.path().to_path_buf(), limited);
        assert_eq!(scanner.scan().unwrap().len(), 2);

        let mut small = config();
        small.max_file_size = 1024;
        let scanner = FileScanner::new(dir.path().to_path_buf(), small);
        assert!(scanner.scan().unwrap().iter().all(|f| f.path != "src/huge.rs"));
    }

    #[test]
    fn test_collect_files_reads_content() {
        let dir = sample_project();
        let scanner = FileScanner::new(dir.path().to_path_buf(), config());
        let files = scanner.collect_files().unwrap();
        let main = files.iter().find(|f| f.path == "src/main.rs").unwrap();
        assert_eq!(main.content, "fn main() {}");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let scanner = FileScanner::new(PathBuf::from("/definitely/not/here"), config());
        assert!(scanner.scan().is_err());
    }

    #[test]
    fn test_categorize_fixture_paths() {
        assert_eq!(categorize("fixtures/sample/src/handlers/orders.rs"), "api");
        assert_eq!(categorize("web/src/index.ts"), "entry");
        assert_eq!(categorize("db/schema.sql"), "data");
        assert_eq!(categorize("src/app_config.py"), "config");
        assert_eq!(categorize("src/parser.spec.ts"), "tests");
        assert_eq!(categorize("src/util/strings.rs"), "core");
    }
}
