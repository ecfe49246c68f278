//! The `invigil run` command: drive a headless session against a real
//! exam server. Intended for operational smoke tests and load scripts, not
//! for taking exams.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use invigil_core::model::{Exam, SessionConfig};
use invigil_core::session::ExamSession;
use invigil_core::traits::SharedPresentationLock;
use invigil_net::load_config_from;

pub async fn execute(
    exam_path: PathBuf,
    student: String,
    answers_path: Option<PathBuf>,
    submit_after: Option<u64>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let exam: Exam = {
        let content = std::fs::read_to_string(&exam_path)
            .with_context(|| format!("failed to read exam: {}", exam_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse exam: {}", exam_path.display()))?
    };

    let answers: HashMap<String, String> = match &answers_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read answers: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse answers: {}", path.display()))?
        }
        None => HashMap::new(),
    };

    let net = load_config_from(config_path.as_deref())?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let backend = Arc::new(net.backend());
    let channel = Arc::new(net.channel(events_tx));
    let lock = Arc::new(SharedPresentationLock::new());

    let (mut session, handle) = ExamSession::new(
        exam,
        student,
        SessionConfig::default(),
        backend,
        channel,
        lock,
        events_rx,
    );
    session
        .start_or_resume()
        .await
        .context("could not start attempt")?;

    let mut watch = handle.watch();
    let driver = tokio::spawn(session.run());

    for (question, option) in &answers {
        handle.select_answer(question, Some(option.as_str()));
    }
    info!(answered = answers.len(), "answers applied");

    if let Some(secs) = submit_after {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        handle.request_submit();
    }

    let outcome = watch
        .wait_for(|snapshot| snapshot.state.is_terminal())
        .await
        .context("session ended without reaching a terminal state")?
        .clone();
    driver.await?;

    println!("attempt finished: {}", outcome.state);
    println!("answered: {}", outcome.answered_count);
    println!("violations: {}", outcome.violation_count);
    if let Some(error) = outcome.last_error {
        anyhow::bail!("attempt ended with error: {error}");
    }
    Ok(())
}
