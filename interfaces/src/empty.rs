use async_trait::async_trait;

use crate::defs::SummarizeError;
use crate::defs::Summarizer;
use crate::defs::Translator;

/// Leaves text untouched. Used when no translation service is configured.
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, text: &str) -> String {
        text.to_owned()
    }
}

/// Never produces a digest, so pending buffers are kept until a real summarizer shows up.
pub struct EmptySummarizer;

#[async_trait]
impl Summarizer for EmptySummarizer {
    async fn summarize(&self, _texts: &[String], _prompt: Option<&str>) -> Result<String, SummarizeError> {
        Err(SummarizeError::Unavailable)
    }
}
