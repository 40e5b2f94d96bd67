//! Markdown and JSON report generation.
//!
//! The Markdown report renders each category section generically: the
//! summary as prose, arrays as bullet lists and nested objects as key/value
//! lists.

use crate::models::{ChunkOutcome, ChunkStatus, MergedAnalysis, Report, ReportMetadata};
use crate::scanner::CATEGORIES;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# CodeLens Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(&report.analysis));
    output.push_str(&generate_summary_section(&report.analysis));

    for category in ordered_categories(&report.analysis) {
        if let Some(section) = report.analysis.sections.get(category) {
            output.push_str(&generate_category_section(category, section));
        }
    }

    output.push_str(&generate_warnings_section(&report.analysis.warnings));
    output.push_str(&generate_provider_section(&report.analysis.outcomes));
    output.push_str(&generate_footer());

    output
}

/// Known categories first, in scanner order, then anything else by name.
fn ordered_categories(analysis: &MergedAnalysis) -> Vec<&str> {
    let mut ordered: Vec<&str> = CATEGORIES
        .iter()
        .copied()
        .filter(|c| analysis.sections.contains_key(*c))
        .collect();
    ordered.extend(
        analysis
            .sections
            .keys()
            .map(String::as_str)
            .filter(|c| !CATEGORIES.contains(c)),
    );
    ordered
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Root:** `{}`\n", metadata.root));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Dispatch:** {}\n", metadata.dispatch));
    if !metadata.providers.is_empty() {
        section.push_str(&format!(
            "- **Providers:** {}\n",
            metadata
                .providers
                .iter()
                .map(|p| format!("`{}`", p))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    section.push_str(&format!("- **Files Scanned:** {}\n", metadata.files_scanned));
    section.push_str(&format!("- **Chunks:** {}\n", metadata.chunks));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

fn generate_table_of_contents(analysis: &MergedAnalysis) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    for category in ordered_categories(analysis) {
        toc.push_str(&format!("- [{}](#{})\n", title_case(category), anchor(category)));
    }
    if !analysis.warnings.is_empty() {
        toc.push_str("- [Warnings](#warnings)\n");
    }
    toc.push_str("- [Provider Diagnostics](#provider-diagnostics)\n\n");

    toc
}

fn generate_summary_section(analysis: &MergedAnalysis) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Chunks | Resolved | Fallback |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} |\n\n",
        analysis.outcomes.len(),
        analysis.resolved_count(),
        analysis.fallback_count()
    ));

    let mut by_category: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for outcome in &analysis.outcomes {
        let entry = by_category.entry(outcome.category.as_str()).or_default();
        entry.0 += 1;
        if outcome.status == ChunkStatus::Fallback {
            entry.1 += 1;
        }
    }

    if !by_category.is_empty() {
        section.push_str("### Chunks by Category\n\n");
        section.push_str("| Category | Chunks | Fallback |\n");
        section.push_str("|:---|:---:|:---:|\n");
        for (category, (chunks, fallback)) in by_category {
            section.push_str(&format!("| {} | {} | {} |\n", category, chunks, fallback));
        }
        section.push('\n');
    }

    section
}

fn generate_category_section(category: &str, value: &Value) -> String {
    let mut section = String::new();

    section.push_str(&format!("## {}\n\n", title_case(category)));

    let Value::Object(fields) = value else {
        section.push_str(&render_scalar(value));
        section.push_str("\n\n");
        return section;
    };

    if let Some(summary) = fields.get("summary").and_then(Value::as_str) {
        section.push_str(summary);
        section.push_str("\n\n");
    }

    if fields.get("incomplete") == Some(&Value::Bool(true)) {
        section.push_str("> ⚠️ Some chunks of this category used fallback results.\n\n");
    }

    for (key, field) in fields {
        if key == "summary" || key == "incomplete" {
            continue;
        }
        section.push_str(&format!("### {}\n\n", title_case(key)));
        section.push_str(&render_block(field));
        section.push('\n');
    }

    section
}

/// Render a field as a Markdown block.
fn render_block(value: &Value) -> String {
    match value {
        Value::Array(items) if items.is_empty() => "_None reported._\n".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| format!("- {}\n", render_scalar(item)))
            .collect(),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| format!("- **{}:** {}\n", k, render_scalar(v)))
            .collect(),
        other => format!("{}\n", render_scalar(other)),
    }
}

/// Render a value inline.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render_scalar(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn generate_warnings_section(warnings: &[String]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Warnings\n\n");
    for warning in warnings {
        section.push_str(&format!("- {}\n", warning));
    }
    section.push('\n');
    section
}

fn generate_provider_section(outcomes: &[ChunkOutcome]) -> String {
    let mut section = String::new();
    section.push_str("## Provider Diagnostics\n\n");

    // provider -> (chunks, summed confidence, confidence samples)
    let mut stats: BTreeMap<&str, (usize, f64, usize)> = BTreeMap::new();
    for outcome in outcomes {
        let Some(provider) = outcome.provider.as_deref() else {
            continue;
        };
        let entry = stats.entry(provider).or_default();
        entry.0 += 1;
        if let Some(confidence) = outcome.confidence {
            entry.1 += confidence;
            entry.2 += 1;
        }
    }

    if stats.is_empty() {
        section.push_str("No chunk was resolved by a provider.\n\n");
        return section;
    }

    section.push_str("| Provider | Chunks | Avg. Confidence |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for (provider, (chunks, confidence_sum, samples)) in stats {
        let confidence = if samples == 0 {
            "-".to_string()
        } else {
            format!("{:.2}", confidence_sum / samples as f64)
        };
        section.push_str(&format!("| `{}` | {} | {} |\n", provider, chunks, confidence));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by CodeLens*\n".to_string()
}

fn title_case(key: &str) -> String {
    key.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn anchor(key: &str) -> String {
    title_case(key).to_lowercase().replace(' ', "-")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
