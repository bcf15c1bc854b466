//! Markdown rendering of the side-channel blocks

use crate::config::LabelConfig;

use super::event::RagResult;

#[derive(Debug, Clone, Default)]
pub struct BlockRenderer {
    labels: LabelConfig,
}

impl BlockRenderer {
    pub fn new(labels: LabelConfig) -> Self {
        Self { labels }
    }

    /// Heading plus one bullet per sub-query
    pub fn search_trace(&self, questions: &[String]) -> String {
        let bullets: Vec<String> = questions.iter().map(|q| format!("- {q}")).collect();
        format!("### {}\n{}\n\n", self.labels.search_process, bullets.join("\n"))
    }

    /// Heading plus one numbered, linked line per source
    pub fn sources(&self, results: &[RagResult]) -> String {
        let mut block = format!("### {}\n", self.labels.sources);
        for (i, result) in results.iter().enumerate() {
            let n = i + 1;
            let title = result.title.as_deref().unwrap_or(&self.labels.unknown_title);
            let link = result.link.as_deref().unwrap_or("#");
            let source = result.source.as_deref().unwrap_or(&self.labels.unknown_source);
            block.push_str(&format!("{n}. {title} [<sup>{n}</sup>]({link}) - *{source}*\n"));
        }
        block.push('\n');
        block
    }

    pub fn answer_header(&self) -> String {
        format!("### {}\n", self.labels.answer)
    }
}
