//! Prompt construction for chunk analysis.

use crate::models::ChunkTask;

pub const SYSTEM_PROMPT: &str = "You are a senior software engineer documenting an unfamiliar \
codebase. Answer with a single JSON object and nothing else.";

/// JSON shape requested for each category.
fn response_shape(category: &str) -> &'static str {
    match category {
        "entry" => r#"{"summary": "...", "entry_points": ["..."], "startup_flow": ["..."]}"#,
        "api" => r#"{"summary": "...", "endpoints": ["..."], "dependencies": ["..."]}"#,
        "data" => r#"{"summary": "...", "models": ["..."], "storage": ["..."]}"#,
        "config" => r#"{"summary": "...", "settings": ["..."], "dependencies": ["..."]}"#,
        "tests" => r#"{"summary": "...", "test_areas": ["..."], "gaps": ["..."]}"#,
        _ => r#"{"summary": "...", "components": ["..."], "responsibilities": ["..."]}"#,
    }
}

fn focus(category: &str) -> &'static str {
    match category {
        "entry" => "how the program starts and what it wires together",
        "api" => "the interfaces this code exposes and what they call into",
        "data" => "the data models and how they are stored or exchanged",
        "config" => "what can be configured and which dependencies are declared",
        "tests" => "what is tested and which areas look untested",
        _ => "the main components and what each one is responsible for",
    }
}

/// Build the analysis prompt for one chunk.
pub fn build_prompt(task: &ChunkTask) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Analyze the following {} files. Focus on {}.\n",
        task.category,
        focus(&task.category)
    ));
    if !task.context.is_empty() {
        prompt.push_str(&task.context);
        prompt.push('\n');
    }
    prompt.push_str("\nRespond with one JSON object in exactly this shape:\n");
    prompt.push_str(response_shape(&task.category));
    prompt.push_str("\n\n=== FILES TO ANALYZE ===\n\n");

    for file in &task.files {
        prompt.push_str(&format!("### FILE: {}\n```\n{}\n```\n\n", file.path, file.content));
    }

    prompt.push_str("=== END OF FILES ===\n\nNow output the JSON object:");
    prompt
}
