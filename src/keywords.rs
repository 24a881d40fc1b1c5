//! Question → full-text keywords, via one language-model completion.

use std::sync::Arc;

use crate::error::Result;
use crate::llm::LanguageModel;

/// Boilerplate the model tends to put in front of its list.
const BOILERPLATE_PREFIXES: &[&str] = &["Answer: ", "Keywords: "];

pub fn keyword_prompt(question: &str) -> String {
    format!(
        "Transform this question into elastic search keywords: {}? \
         Only list the keywords in comma separated format.",
        question.trim().trim_end_matches('?')
    )
}

/// Normalize a raw completion into a keyword list.
///
/// Control characters become spaces and boilerplate prefixes are removed,
/// then the text is split on `", "`. Blank entries are dropped, so an empty or garbled
/// completion yields an empty list rather than an error.
pub fn parse_keywords(completion: &str) -> Vec<String> {
    let mut cleaned: String = completion
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    for prefix in BOILERPLATE_PREFIXES {
        cleaned = cleaned.replace(prefix, "");
    }

    cleaned
        .split(", ")
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
        .collect()
}

pub struct KeywordExtractor {
    model: Arc<dyn LanguageModel>,
}

impl KeywordExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// One completion call, no retry. Transport failures propagate; an
    /// unusable completion is an empty list.
    pub async fn extract(&self, question: &str) -> Result<Vec<String>> {
        let completion = self.model.complete(&keyword_prompt(question)).await?;
        let keywords = parse_keywords(&completion);
        tracing::debug!(?keywords, "extracted keywords");
        Ok(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_parse_strips_prefix_and_control_chars() {
        let kws = parse_keywords("\nKeywords: natural gas,\tprices, California\n");
        assert_eq!(kws, vec!["natural gas", "prices", "California"]);
    }

    #[test]
    fn test_parse_comma_followed_by_newline() {
        assert_eq!(
            parse_keywords("shipment,\ndelivery, delayed"),
            vec!["shipment", "delivery", "delayed"]
        );
        assert_eq!(
            parse_keywords("Keywords: audit,\r\nAndersen"),
            vec!["audit", "Andersen"]
        );
    }

    #[test]
    fn test_parse_answer_prefix() {
        assert_eq!(
            parse_keywords("Answer: board meeting, Houston"),
            vec!["board meeting", "Houston"]
        );
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert!(parse_keywords("").is_empty());
        assert!(parse_keywords("\n\t\r").is_empty());
        assert!(parse_keywords("Keywords: ").is_empty());
        assert_eq!(parse_keywords("singleword"), vec!["singleword"]);
    }

    #[test]
    fn test_parse_output_is_clean() {
        let raw = "Answer: Keywords: a\u{7}b, c\r\n, Answer: d";
        for kw in parse_keywords(raw) {
            assert!(!kw.chars().any(|c| c.is_control()));
            assert!(!kw.starts_with("Answer: ") && !kw.starts_with("Keywords: "));
        }
    }

    #[test]
    fn test_prompt_template() {
        assert_eq!(
            keyword_prompt("When was the board meeting?"),
            "Transform this question into elastic search keywords: When was the board meeting? \
             Only list the keywords in comma separated format."
        );
    }

    #[tokio::test]
    async fn test_extract_issues_single_call() {
        let model = Arc::new(Canned {
            reply: "Keywords: Enron, stock".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let extractor = KeywordExtractor::new(model.clone());
        let kws = extractor.extract("What happened to the stock").await.unwrap();
        assert_eq!(kws, vec!["Enron", "stock"]);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }
}
