//! Adaptive interview sessions for the outgoing team member.
//!
//! Two flows share one state machine: the project interview walks a chat
//! transcript and asks the LLM for the next uncovered topic; the document
//! interview walks a document's chunks and asks one question per chunk.
//! Answers are chunked and ingested with the question id as their origin,
//! so the interview feeds the same knowledge base the answerer queries.

use async_trait::async_trait;
use tracing::instrument;

use crate::error::{RelayError, RelayResult};
use crate::llm_client::{CompletionOptions, SharedLlmClient};
use crate::rag::pipeline::IngestionPipeline;

/// Session lifecycle. `Complete` is terminal: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingQuestion,
    QuestionIssued,
    AnswerReceived,
    Complete,
}

/// Reply that tells the project interview the model considers the ground
/// covered.
pub const COMPLETION_SENTINEL: &str = "SESSION_COMPLETE";

const OPENING_QUESTION: &str = "What is the primary purpose and mission of this project?";

const INTERVIEW_PROMPT: &str = "You are an AI assistant helping an experienced developer \
transfer project knowledge. Your goal is to ask insightful, open-ended questions to \
extract critical information. Focus on areas like project purpose, architecture, key \
technologies, deployment, common issues, team practices, and important contacts. Avoid \
asking questions that have already been covered. If enough information has been \
gathered, reply with exactly SESSION_COMPLETE. Ask one question at a time.";

const DOCUMENT_QUESTION_PROMPT: &str = "You are a knowledge transfer assistant for \
software project teams. Analyze the document excerpt and identify the critical \
knowledge gap that only an experienced team member could fill: unwritten context, \
decisions, or operational knowledge. Do not answer the question yourself. Do not \
repeat a question that was already asked. Reply with exactly one question, prefixed \
with 'Q:'.";

/// Common driver surface for both interview flows.
#[async_trait]
pub trait InterviewFlow: Send {
    /// `Ok(None)` once the session is complete, every time thereafter.
    async fn next_question(&mut self) -> RelayResult<Option<String>>;

    /// Ingest the answer to the pending question, closing the loop.
    async fn record_answer(
        &mut self,
        pipeline: &IngestionPipeline,
        answer: &str,
    ) -> RelayResult<Vec<String>>;

    fn state(&self) -> SessionState;
}

#[derive(Debug, Clone)]
struct IssuedQuestion {
    id: String,
    text: String,
}

/// One answered interview turn.
#[derive(Debug, Clone)]
pub struct QaExchange {
    pub question: String,
    pub answer: String,
}

/// Chat-driven interview: the next question targets whatever the
/// accumulated transcript has not covered yet.
pub struct ProjectInterview {
    llm: SharedLlmClient,
    project_id: String,
    exchanges: Vec<QaExchange>,
    pending: Option<IssuedQuestion>,
    state: SessionState,
    max_turns: usize,
    issued: usize,
}

impl ProjectInterview {
    pub const DEFAULT_MAX_TURNS: usize = 10;

    pub fn new(llm: SharedLlmClient, project_id: impl Into<String>) -> Self {
        Self {
            llm,
            project_id: project_id.into(),
            exchanges: Vec::new(),
            pending: None,
            state: SessionState::AwaitingQuestion,
            max_turns: Self::DEFAULT_MAX_TURNS,
            issued: 0,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn exchanges(&self) -> &[QaExchange] {
        &self.exchanges
    }
}

#[async_trait]
impl InterviewFlow for ProjectInterview {
    #[instrument(skip_all, fields(project_id = %self.project_id, issued = self.issued))]
    async fn next_question(&mut self) -> RelayResult<Option<String>> {
        match self.state {
            SessionState::Complete => return Ok(None),
            SessionState::QuestionIssued => {
                return Err(RelayError::validation(
                    "a question is already pending an answer",
                ))
            }
            SessionState::AwaitingQuestion | SessionState::AnswerReceived => {}
        }

        if self.issued >= self.max_turns {
            self.state = SessionState::Complete;
            return Ok(None);
        }

        let text = if self.exchanges.is_empty() {
            OPENING_QUESTION.to_string()
        } else {
            let transcript = self
                .exchanges
                .iter()
                .map(|qa| format!("Q: {}\nA: {}", qa.question, qa.answer))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "{INTERVIEW_PROMPT}\n\nCovered so far:\n{transcript}\n\nWhat is the next important question to ask about this project?"
            );
            let reply = self
                .llm
                .complete(&prompt, &CompletionOptions::deterministic())
                .await?;
            if reply.contains(COMPLETION_SENTINEL) {
                self.state = SessionState::Complete;
                return Ok(None);
            }
            parse_question(&reply)
                .ok_or_else(|| RelayError::generation("interviewer returned no question"))?
        };

        self.issued += 1;
        self.pending = Some(IssuedQuestion {
            id: format!("{}-q{}", self.project_id, self.issued),
            text: text.clone(),
        });
        self.state = SessionState::QuestionIssued;
        Ok(Some(text))
    }

    async fn record_answer(
        &mut self,
        pipeline: &IngestionPipeline,
        answer: &str,
    ) -> RelayResult<Vec<String>> {
        if self.state != SessionState::QuestionIssued {
            return Err(RelayError::validation("no question is pending an answer"));
        }
        let pending = self
            .pending
            .as_ref()
            .ok_or_else(|| RelayError::validation("no question is pending an answer"))?;

        let ids = pipeline
            .ingest_answer(&self.project_id, &pending.id, &pending.text, answer)
            .await?;

        let pending = self.pending.take().expect("pending question checked above");
        self.exchanges.push(QaExchange {
            question: pending.text,
            answer: answer.to_string(),
        });
        self.state = if self.issued >= self.max_turns {
            SessionState::Complete
        } else {
            SessionState::AnswerReceived
        };
        Ok(ids)
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

/// Chunk-driven interview: exactly one question per document chunk, in
/// order; the session completes when every chunk has yielded a question.
pub struct DocumentInterview {
    llm: SharedLlmClient,
    project_id: String,
    document_id: String,
    chunks: Vec<String>,
    asked: Vec<String>,
    cursor: usize,
    pending: Option<IssuedQuestion>,
    state: SessionState,
}

impl DocumentInterview {
    pub fn new(
        llm: SharedLlmClient,
        project_id: impl Into<String>,
        document_id: impl Into<String>,
        chunks: Vec<String>,
    ) -> RelayResult<Self> {
        let document_id = document_id.into();
        if chunks.is_empty() {
            return Err(RelayError::not_found(format!(
                "document '{document_id}' has no chunks to interview over"
            )));
        }
        Ok(Self {
            llm,
            project_id: project_id.into(),
            document_id,
            chunks,
            asked: Vec::new(),
            cursor: 0,
            pending: None,
            state: SessionState::AwaitingQuestion,
        })
    }
}

#[async_trait]
impl InterviewFlow for DocumentInterview {
    #[instrument(skip_all, fields(document_id = %self.document_id, cursor = self.cursor))]
    async fn next_question(&mut self) -> RelayResult<Option<String>> {
        match self.state {
            SessionState::Complete => return Ok(None),
            SessionState::QuestionIssued => {
                return Err(RelayError::validation(
                    "a question is already pending an answer",
                ))
            }
            SessionState::AwaitingQuestion | SessionState::AnswerReceived => {}
        }

        if self.cursor >= self.chunks.len() {
            self.state = SessionState::Complete;
            return Ok(None);
        }

        let chunk = &self.chunks[self.cursor];
        let asked = if self.asked.is_empty() {
            "(none)".to_string()
        } else {
            self.asked
                .iter()
                .map(|q| format!("- {q}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = format!(
            "{DOCUMENT_QUESTION_PROMPT}\n\nAlready asked:\n{asked}\n\nDocument excerpt:\n{chunk}"
        );

        let reply = self
            .llm
            .complete(&prompt, &CompletionOptions::deterministic())
            .await?;
        let text = parse_question(&reply)
            .ok_or_else(|| RelayError::generation("interviewer returned no question"))?;

        self.cursor += 1;
        self.asked.push(text.clone());
        self.pending = Some(IssuedQuestion {
            id: format!("{}-q{}", self.document_id, self.cursor),
            text: text.clone(),
        });
        self.state = SessionState::QuestionIssued;
        Ok(Some(text))
    }

    async fn record_answer(
        &mut self,
        pipeline: &IngestionPipeline,
        answer: &str,
    ) -> RelayResult<Vec<String>> {
        if self.state != SessionState::QuestionIssued {
            return Err(RelayError::validation("no question is pending an answer"));
        }
        let pending = self
            .pending
            .as_ref()
            .ok_or_else(|| RelayError::validation("no question is pending an answer"))?;

        let ids = pipeline
            .ingest_answer(&self.project_id, &pending.id, &pending.text, answer)
            .await?;

        self.pending = None;
        self.state = if self.cursor >= self.chunks.len() {
            SessionState::Complete
        } else {
            SessionState::AnswerReceived
        };
        Ok(ids)
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

/// First usable line of a model reply, with any `Q:` prefix stripped.
fn parse_question(reply: &str) -> Option<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_prefix("Q:").unwrap_or(line).trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::llm_client::LlmClient;
    use crate::rag::embed::HashEmbedder;
    use crate::rag::memory::InMemoryStore;
    use crate::rag::store::SharedKnowledgeStore;
    use crate::rag::types::{ChunkFilters, SourceType};

    /// Plays back canned replies in order.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedLlm {
        fn shared(replies: &[&str]) -> SharedLlmClient {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> RelayResult<String> {
            self.replies
                .lock()
                .expect("script lock")
                .pop_front()
                .ok_or_else(|| RelayError::generation("script exhausted"))
        }
    }

    fn pipeline() -> (IngestionPipeline, SharedKnowledgeStore) {
        let store: SharedKnowledgeStore =
            Arc::new(InMemoryStore::new(Arc::new(HashEmbedder::default())));
        (IngestionPipeline::new(store.clone()), store)
    }

    #[tokio::test]
    async fn complete_is_terminal_for_project_interviews() {
        let (pipeline, _) = pipeline();
        let llm = ScriptedLlm::shared(&[]);
        let mut session = ProjectInterview::new(llm, "p1").with_max_turns(1);

        let first = session.next_question().await.unwrap();
        assert_eq!(first.as_deref(), Some(OPENING_QUESTION));

        session
            .record_answer(&pipeline, "It moves project knowledge between team members.")
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Complete);

        for _ in 0..3 {
            assert!(session.next_question().await.unwrap().is_none());
            assert_eq!(session.state(), SessionState::Complete);
        }
    }

    #[tokio::test]
    async fn model_sentinel_completes_the_session() {
        let (pipeline, _) = pipeline();
        let llm = ScriptedLlm::shared(&["SESSION_COMPLETE"]);
        let mut session = ProjectInterview::new(llm, "p1");

        session.next_question().await.unwrap();
        session.record_answer(&pipeline, "First answer.").await.unwrap();
        assert_eq!(session.state(), SessionState::AnswerReceived);

        assert!(session.next_question().await.unwrap().is_none());
        assert_eq!(session.state(), SessionState::Complete);
        assert!(session.next_question().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_question_must_be_answered_first() {
        let (pipeline, _) = pipeline();
        let llm = ScriptedLlm::shared(&[]);
        let mut session = ProjectInterview::new(llm, "p1");

        session.next_question().await.unwrap();
        let err = session.next_question().await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        session.record_answer(&pipeline, "Answered.").await.unwrap();
        let err = session.record_answer(&pipeline, "Again?").await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn answers_land_in_the_knowledge_store() {
        let (pipeline, store) = pipeline();
        let llm = ScriptedLlm::shared(&[]);
        let mut session = ProjectInterview::new(llm, "p1");

        session.next_question().await.unwrap();
        session
            .record_answer(&pipeline, "The project syncs deploy knowledge across teams.")
            .await
            .unwrap();

        let filters = ChunkFilters {
            source_type: Some(SourceType::ChatAnswer),
            ..ChunkFilters::default()
        };
        let hits = store
            .query("p1", "deploy knowledge", &filters, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.origin_id, "p1-q1");
        assert_eq!(hits[0].metadata.question.as_deref(), Some(OPENING_QUESTION));
    }

    #[tokio::test]
    async fn document_interview_asks_once_per_chunk() {
        let (pipeline, store) = pipeline();
        let llm = ScriptedLlm::shared(&[
            "Q: Why was the staging gate added?",
            "Q: Who owns the rollback runbook?",
        ]);
        let chunks = vec![
            "Deploys pass a staging gate before prod.".to_string(),
            "Rollbacks follow the runbook in ops/.".to_string(),
        ];
        let mut session = DocumentInterview::new(llm, "p1", "doc-9", chunks).unwrap();

        let q1 = session.next_question().await.unwrap().unwrap();
        assert_eq!(q1, "Why was the staging gate added?");
        session
            .record_answer(&pipeline, "Prod broke twice without it.")
            .await
            .unwrap();

        let q2 = session.next_question().await.unwrap().unwrap();
        assert_eq!(q2, "Who owns the rollback runbook?");
        session
            .record_answer(&pipeline, "The on-call rotation owns it.")
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Complete);
        assert!(session.next_question().await.unwrap().is_none());
        assert!(session.next_question().await.unwrap().is_none());

        let hits = store
            .query("p1", "staging gate rollback runbook", &ChunkFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let mut origins: Vec<&str> = hits.iter().map(|h| h.metadata.origin_id.as_str()).collect();
        origins.sort_unstable();
        assert_eq!(origins, vec!["doc-9-q1", "doc-9-q2"]);
    }

    #[tokio::test]
    async fn document_interview_requires_chunks() {
        let llm = ScriptedLlm::shared(&[]);
        let err = DocumentInterview::new(llm, "p1", "doc-empty", Vec::new()).unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[test]
    fn question_parsing_strips_the_prefix() {
        assert_eq!(
            parse_question("Q: What does the cron job do?\nextra"),
            Some("What does the cron job do?".to_string())
        );
        assert_eq!(
            parse_question("\n\nWhy is the cache disabled?"),
            Some("Why is the cache disabled?".to_string())
        );
        assert_eq!(parse_question("   \n\n"), None);
    }
}
