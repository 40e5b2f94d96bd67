//! Splits scanned files into size-bounded chunks, one category per chunk.

use crate::models::{ChunkFile, ChunkTask};
use crate::scanner::{SourceFile, CATEGORIES};
use tracing::debug;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Group files by category (in [`CATEGORIES`] order) and pack each group
/// into chunks of at most `max_chunk_bytes` content bytes.
///
/// A file larger than the budget gets a chunk of its own, truncated to fit.
pub fn build_chunks(files: Vec<SourceFile>, max_chunk_bytes: usize) -> Vec<ChunkTask> {
    let budget = max_chunk_bytes.max(1);
    let mut chunks = Vec::new();

    for category in CATEGORIES {
        let mut groups: Vec<Vec<ChunkFile>> = Vec::new();
        let mut current: Vec<ChunkFile> = Vec::new();
        let mut current_bytes = 0;

        for file in files.iter().filter(|f| f.category == category) {
            let content = fit_to_budget(&file.content, budget, &file.path);

            if !current.is_empty() && current_bytes + content.len() > budget {
                groups.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes += content.len();
            current.push(ChunkFile {
                path: file.path.clone(),
                content,
            });
        }
        if !current.is_empty() {
            groups.push(current);
        }

        let count = groups.len();
        for (index, group) in groups.into_iter().enumerate() {
            chunks.push(ChunkTask {
                id: format!("{}-{}", category, index + 1),
                category: category.to_string(),
                context: format!(
                    "Part {} of {} of the {} files ({} files).",
                    index + 1,
                    count,
                    category,
                    group.len()
                ),
                files: group,
            });
        }
    }

    debug!("Built {} chunks from {} files", chunks.len(), files.len());
    chunks
}

fn fit_to_budget(content: &str, budget: usize, path: &str) -> String {
    if content.len() <= budget {
        return content.to_string();
    }
    debug!("Truncating {} to {} bytes", path, budget);
    // Budgets too small for the marker get a bare prefix
    if budget <= TRUNCATION_MARKER.len() {
        return truncate_at_char_boundary(content, budget).to_string();
    }
    let keep = budget - TRUNCATION_MARKER.len();
    format!("{}{}", truncate_at_char_boundary(content, keep), TRUNCATION_MARKER)
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
pub fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, category: &'static str, size: usize) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            category,
            content: "x".repeat(size),
        }
    }

    #[test]
    fn test_chunks_follow_category_order() {
        let files = vec![
            file("src/engine.rs", "core", 10),
            file("src/main.rs", "entry", 10),
            file("src/api/routes.rs", "api", 10),
        ];
        let chunks = build_chunks(files, 1024);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["entry-1", "api-1", "core-1"]);
    }

    #[test]
    fn test_chunks_respect_budget() {
        let files = vec![
            file("a.rs", "core", 40),
            file("b.rs", "core", 40),
            file("c.rs", "core", 40),
        ];
        let chunks = build_chunks(files, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].files.len(), 2);
        assert_eq!(chunks[1].file_paths(), vec!["c.rs"]);
        assert!(chunks.iter().all(|c| c.byte_len() <= 100));
        assert!(chunks[0].context.contains("Part 1 of 2"));
    }

    #[test]
    fn test_oversized_file_is_truncated() {
        let chunks = build_chunks(vec![file("big.rs", "core", 500)], 100);
        assert_eq!(chunks.len(), 1);
        let content = &chunks[0].files[0].content;
        assert!(content.len() <= 100);
        assert!(content.ends_with("[truncated]"));
    }

    #[test]
    fn test_tiny_budget_drops_marker() {
        let chunks = build_chunks(vec![file("big.rs", "core", 500)], 8);
        let content = &chunks[0].files[0].content;
        assert_eq!(content, "xxxxxxxx");
        assert!(chunks[0].byte_len() <= 8);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo";
        assert_eq!(truncate_at_char_boundary(text, 2), "h");
        assert_eq!(truncate_at_char_boundary(text, 3), "hé");
        assert_eq!(truncate_at_char_boundary(text, 64), "héllo");
    }

    #[test]
    fn test_no_files_no_chunks() {
        assert!(build_chunks(vec![], 100).is_empty());
    }
}
