use async_trait::async_trait;

use crate::defs::SummarizeError;
use crate::defs::Summarizer;

const MAX_LINE_CHARS: usize = 200;

struct PonderedPrompt {
    pub heading: String,
}

fn ponder_prompt(prompt: Option<&str>, count: usize) -> PonderedPrompt {
    let heading = match prompt {
        Some(prompt) if !prompt.trim().is_empty() => prompt.trim().to_owned(),
        _ => format!("Digest of {count} posts"),
    };
    PonderedPrompt { heading }
}

#[derive(Clone)]
struct FocusedLine {
    pub text: String,
}

/// First sentence of the text, capped at `MAX_LINE_CHARS` characters.
fn focus(text: &str) -> FocusedLine {
    let flat = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    let sentence = match flat.find(". ") {
        Some(end) => &flat[..=end],
        None => flat.as_str(),
    };
    let text = if sentence.chars().count() > MAX_LINE_CHARS {
        let cut: String = sentence.chars().take(MAX_LINE_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        sentence.to_owned()
    };
    FocusedLine { text }
}

fn select_best(lines: &[FocusedLine]) -> Vec<usize> {
    let mut seen: Vec<&str> = Vec::new();
    let mut selected = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if line.text.is_empty() || seen.contains(&line.text.as_str()) {
            continue;
        }
        seen.push(&line.text);
        selected.push(index);
    }
    selected
}

fn compose_digest(pondered: &PonderedPrompt, best: &[FocusedLine]) -> String {
    let mut digest = format!("{}\n", pondered.heading);
    for (i, line) in best.iter().enumerate() {
        digest.push_str(&format!("\n{}. {}", i + 1, line.text));
    }
    digest
}

/// Extractive summarizer that works offline: one leading sentence per post.
pub struct BaselineSummarizer;

#[async_trait]
impl Summarizer for BaselineSummarizer {
    async fn summarize(&self, texts: &[String], prompt: Option<&str>) -> Result<String, SummarizeError> {
        let lines = texts.iter().map(|text| focus(text)).collect::<Vec<FocusedLine>>();
        let best_indices = select_best(&lines);
        if best_indices.is_empty() {
            return Err(SummarizeError::Empty);
        }
        let best = best_indices.iter().map(|index| lines[*index].clone()).collect::<Vec<FocusedLine>>();
        let pondered = ponder_prompt(prompt, texts.len());
        Ok(compose_digest(&pondered, &best))
    }
}
