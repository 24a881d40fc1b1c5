//! Answer synthesis over retrieved context, with conversation memory.
//!
//! [`QaService::ask`] is the full question → answer path used by both the
//! CLI and the HTTP server:
//!
//! 1. Validate the user and the query.
//! 2. Resolve (or mint) the conversation session.
//! 3. With prior turns and `answer.condense_question` on, rewrite the
//!    follow-up into a standalone question.
//! 4. Retrieve context for that question.
//! 5. Render the answer prompt and complete it.
//! 6. Record the exchange. A failed request leaves the session untouched.

use serde::Serialize;
use std::sync::Arc;

use crate::config::{AnswerConfig, PromptStyle};
use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::models::{ContextWindow, Exchange, TimeRange};
use crate::retriever::RetrievalPipeline;
use crate::session::SessionStore;

const DEFAULT_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Question: {question}
Helpful Answer:";

const SYSTEM_HUMAN_TEMPLATE: &str = "System: Use the following pieces of context to answer the users question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.
----------------
{context}
Human: {question}";

const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone question:";

pub fn answer_prompt(style: PromptStyle, context: &ContextWindow, question: &str) -> String {
    let template = match style {
        PromptStyle::Default => DEFAULT_TEMPLATE,
        PromptStyle::SystemHuman => SYSTEM_HUMAN_TEMPLATE,
    };
    template
        .replace("{context}", &context.render())
        .replace("{question}", question)
}

pub fn condense_prompt(history: &[Exchange], question: &str) -> String {
    let chat_history: String = history
        .iter()
        .map(|e| format!("\nHuman: {}\nAssistant: {}", e.question, e.answer))
        .collect();
    CONDENSE_TEMPLATE
        .replace("{chat_history}", &chat_history)
        .replace("{question}", question)
}

/// Models following the system/human template sometimes echo the role tag.
pub fn strip_role_prefix(answer: &str) -> &str {
    let answer = answer.trim();
    answer.strip_prefix("System: ").unwrap_or(answer).trim_start()
}

#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub query: String,
    pub user: String,
    pub session_id: Option<String>,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    /// Distinct source file paths of the context, in context order.
    pub sources: Vec<String>,
    pub session_id: String,
}

pub struct QaService {
    pipeline: Arc<RetrievalPipeline>,
    llm: Arc<dyn LanguageModel>,
    sessions: Arc<SessionStore>,
    config: AnswerConfig,
}

impl QaService {
    pub fn new(
        pipeline: Arc<RetrievalPipeline>,
        llm: Arc<dyn LanguageModel>,
        sessions: Arc<SessionStore>,
        config: AnswerConfig,
    ) -> Self {
        Self {
            pipeline,
            llm,
            sessions,
            config,
        }
    }

    pub fn pipeline(&self) -> &RetrievalPipeline {
        &self.pipeline
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn ask(&self, request: AskRequest) -> Result<Answer> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        self.pipeline.user(&request.user)?;

        let (session_id, history) = self
            .sessions
            .get_or_create(request.session_id.as_deref())
            .await;

        let standalone = if self.config.condense_question && !history.is_empty() {
            let rewritten = self.llm.complete(&condense_prompt(&history, query)).await?;
            let rewritten = rewritten.trim();
            if rewritten.is_empty() {
                query.to_string()
            } else {
                tracing::debug!(original = query, standalone = rewritten, "condensed question");
                rewritten.to_string()
            }
        } else {
            query.to_string()
        };

        let context = self
            .pipeline
            .retrieve(&standalone, &request.user, &request.range)
            .await?;

        let prompt = answer_prompt(self.config.prompt_style, &context, &standalone);
        let completion = self.llm.complete(&prompt).await?;
        let answer = strip_role_prefix(&completion).to_string();

        self.sessions.append(&session_id, query, &answer).await;
        tracing::info!(
            user = %request.user,
            session = %session_id,
            turns = history.len() + 1,
            sources = context.sources().len(),
            "answered"
        );

        Ok(Answer {
            query: query.to_string(),
            answer,
            sources: context.sources(),
            session_id,
        })
    }
}
