//! End-to-end retrieval and answering over a mail directory on disk, with
//! the model, embedding, and search backends replaced by in-process fakes.

mod common;

use enron_qa::answer::AskRequest;
use enron_qa::app::App;
use enron_qa::config::RetrievalMode;
use enron_qa::ingest::{run_ingest, IngestOutcome};
use enron_qa::models::TimeRange;
use enron_qa::progress::NoProgress;
use enron_qa::Error;
use std::sync::Arc;
use tempfile::TempDir;

use common::{config, fakes, write_mail, HashEmbedder, ANSWER};

async fn ingest(config: &enron_qa::config::Config, app: &App) {
    let reports = run_ingest(
        config,
        None,
        false,
        &HashEmbedder,
        &NoProgress,
        Some(app.backends.registry.as_ref()),
    )
    .await
    .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(
        reports[0].outcome,
        IngestOutcome::Built {
            documents: 2,
            chunks: 2
        }
    );
    assert_eq!(reports[1].outcome, IngestOutcome::Skipped);
}

fn ask(query: &str, user: &str, session_id: Option<&str>) -> AskRequest {
    AskRequest {
        query: query.to_string(),
        user: user.to_string(),
        session_id: session_id.map(|s| s.to_string()),
        range: TimeRange::unbounded(),
    }
}

#[tokio::test]
async fn test_fused_answer_uses_only_candidate_mail() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "");
    let fakes = fakes(&cfg, &["<1.board@enron.com>"]);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let answer = app
        .qa
        .ask(ask("When does the board meet?", "Ken", None))
        .await
        .unwrap();

    assert_eq!(answer.answer, ANSWER);
    assert_eq!(answer.sources, vec!["inbox/1."]);
    assert!(!answer.session_id.is_empty());

    let requests = fakes.search.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mailbox, "kenneth.lay@enron.com");
    assert_eq!(requests[0].keywords, vec!["board", "meeting"]);
    assert_eq!(requests[0].size, 5);

    let prompts = fakes.llm.answer_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("The board meets Tuesday in Houston"));
    assert!(!prompts[0].contains("Andersen"));
}

#[tokio::test]
async fn test_follow_up_is_condensed_before_retrieval() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "");
    let fakes = fakes(&cfg, &["<1.board@enron.com>"]);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let first = app
        .qa
        .ask(ask("When does the board meet?", "Ken", None))
        .await
        .unwrap();
    let second = app
        .qa
        .ask(ask("Where?", "Ken", Some(&first.session_id)))
        .await
        .unwrap();
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.query, "Where?");

    let prompts = fakes.llm.prompts();
    let condense = prompts
        .iter()
        .find(|p| p.ends_with("Standalone question:"))
        .expect("follow-up should be condensed");
    assert!(condense.contains("Human: When does the board meet?"));
    assert!(condense.contains(&format!("Assistant: {}", ANSWER)));

    // Keywords for the second turn come from the standalone question
    assert!(prompts
        .iter()
        .any(|p| p.contains("keywords: Where does the board meet on Tuesday?")));

    let history = app.sessions.history(&first.session_id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_structural_errors_are_distinct() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "");
    let fakes = fakes(&cfg, &["<1.board@enron.com>"]);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let err = app.qa.ask(ask("Anything?", "Pete", None)).await.unwrap_err();
    assert!(matches!(err, Error::IndexNotBuilt(ref u) if u == "Pete"));

    let err = app.qa.ask(ask("Anything?", "Nobody", None)).await.unwrap_err();
    assert!(matches!(err, Error::UnknownUser(ref u) if u == "Nobody"));

    // Neither failure reached the model or the search backend
    assert!(fakes.search.requests().is_empty());
    assert!(fakes.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_time_range_reaches_fulltext_search() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "");
    let fakes = fakes(&cfg, &["<2.audit@enron.com>"]);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let range = TimeRange::from_dates(Some("2001-10-01"), Some("2001-10-31")).unwrap();
    let window = app
        .pipeline
        .retrieve("When is the audit?", "Ken", &range)
        .await
        .unwrap();

    assert_eq!(window.sources(), vec!["inbox/2."]);
    assert_eq!(fakes.search.requests()[0].range, range);
}

#[tokio::test]
async fn test_no_candidates_gives_empty_context() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "");
    let fakes = fakes(&cfg, &[]);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let answer = app
        .qa
        .ask(ask("What about the weather?", "Ken", None))
        .await
        .unwrap();
    assert!(answer.sources.is_empty());
    assert_eq!(fakes.llm.answer_prompts().len(), 1);
}

#[tokio::test]
async fn test_persisted_index_is_loaded_by_a_new_process() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "");
    {
        let fakes = fakes(&cfg, &[]);
        let app = App::with_backends(&cfg, fakes.backends.clone());
        ingest(&cfg, &app).await;
    }

    let fakes = fakes(&cfg, &["<1.board@enron.com>"]);
    let registry = Arc::clone(&fakes.backends.registry);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    assert!(!registry.is_loaded("Ken").await);

    let window = app
        .pipeline
        .retrieve("When does the board meet?", "Ken", &TimeRange::unbounded())
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert!(registry.is_loaded("Ken").await);

    // A second ingest finds the index and leaves it alone
    let reports = run_ingest(&cfg, Some("Ken"), false, &HashEmbedder, &NoProgress, None)
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, IngestOutcome::Existing { chunks: 2 });
}

#[tokio::test]
async fn test_embedding_mode_skips_fulltext() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "[retrieval]\nmode = \"embedding\"");
    assert_eq!(cfg.retrieval.mode, RetrievalMode::Embedding);
    let fakes = fakes(&cfg, &["<1.board@enron.com>"]);
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let window = app
        .pipeline
        .retrieve("audit", "Ken", &TimeRange::unbounded())
        .await
        .unwrap();

    // Both messages fit the budget, so both are in the window
    assert_eq!(window.len(), 2);
    assert!(fakes.search.requests().is_empty());
    assert!(fakes.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_fulltext_mode_keeps_candidate_order() {
    let tmp = TempDir::new().unwrap();
    write_mail(tmp.path());
    let cfg = config(&tmp, "[retrieval]\nmode = \"fulltext\"");
    let fakes = fakes(
        &cfg,
        &["<2.audit@enron.com>", "<1.board@enron.com>", "<2.audit@enron.com>"],
    );
    let app = App::with_backends(&cfg, fakes.backends.clone());
    ingest(&cfg, &app).await;

    let window = app
        .pipeline
        .retrieve("board and audit", "Ken", &TimeRange::unbounded())
        .await
        .unwrap();
    assert_eq!(window.sources(), vec!["inbox/2.", "inbox/1."]);
}
