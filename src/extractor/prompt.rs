//! Prompt assembly for insight extraction
//!
//! The system prompt is built once per responder from the configured pillar
//! list; the user prompt carries the note content and, when present, a
//! one-line pillar hint from the note's frontmatter.

use crate::config::Pillar;

/// Build the extraction system prompt from the pillar catalogue.
pub fn build_system_prompt(pillars: &[Pillar]) -> String {
    let mut prompt = String::from(
        "You extract publishable insights from personal notes.\n\
         Return ONLY a JSON array. Each element must have:\n\
         - topic: short topic statement (non-empty string)\n\
         - pillar: one of the pillar ids below, or null\n\
         - hook: one-sentence opening hook\n\
         - excerpt: the strongest passage, quoted verbatim\n\
         - scores: {\"topicClarity\", \"publishReady\", \"novelty\"} each in [0,1]\n\
         - formats: array of suggested formats (e.g. \"thread\", \"essay\")\n\
         Return [] when the note contains nothing worth publishing.\n",
    );

    if !pillars.is_empty() {
        prompt.push_str("\nContent pillars:\n");
        for pillar in pillars {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                pillar.id,
                pillar.name,
                pillar.keywords.join(", ")
            ));
        }
    }

    prompt
}

/// Build the per-note user prompt.
pub fn build_user_prompt(content: &str, pillar_hint: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(pillar) = pillar_hint {
        prompt.push_str(&format!(
            "The author tagged this note with the \"{pillar}\" pillar.\n\n"
        ));
    }
    prompt.push_str("Note content:\n\n");
    prompt.push_str(content);
    prompt
}
