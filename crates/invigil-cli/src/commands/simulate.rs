//! The `invigil simulate` command: a fully local dry run against the mock
//! collaborators, no exam server required.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use uuid::Uuid;

use invigil_core::model::{Exam, Question, SessionConfig, SessionState};
use invigil_core::session::ExamSession;
use invigil_core::traits::SharedPresentationLock;
use invigil_net::{MockBackend, MockChannel};

pub async fn execute(questions: usize, unanswered: usize) -> Result<()> {
    let exam = mock_exam(questions);
    let attempt_id = format!("sim-{}", Uuid::new_v4());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let backend = Arc::new(MockBackend::new(&attempt_id));
    let channel = Arc::new(MockChannel::new(events_tx));
    let lock = Arc::new(SharedPresentationLock::new());

    let (mut session, handle) = ExamSession::new(
        exam,
        "sim-student",
        SessionConfig::default(),
        backend.clone(),
        channel,
        lock,
        events_rx,
    );
    session.start_or_resume().await?;

    let mut watch = handle.watch();
    let driver = tokio::spawn(session.run());

    let to_answer = questions.saturating_sub(unanswered);
    for i in 0..to_answer {
        handle.select_answer(&format!("q{}", i + 1), Some("A"));
    }
    handle.request_submit();

    let outcome = watch
        .wait_for(|snapshot| snapshot.state.is_terminal())
        .await?
        .clone();
    driver.await?;

    println!("simulated attempt {attempt_id}: {}", outcome.state);
    println!(
        "answered: {}/{}",
        backend
            .last_submit()
            .map_or(0, |request| request.answers.len()),
        questions
    );
    if outcome.state != SessionState::Submitted {
        anyhow::bail!("simulated session ended in {}", outcome.state);
    }
    Ok(())
}

fn mock_exam(questions: usize) -> Exam {
    Exam {
        id: "sim-exam".into(),
        title: "Simulated exam".into(),
        description: "Generated locally for a dry run".into(),
        class_id: "sim-class".into(),
        duration_minutes: 30,
        total_score: questions as f64,
        max_violations: 5,
        questions: (1..=questions)
            .map(|i| Question {
                id: format!("q{i}"),
                prompt: format!("Simulated question {i}"),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                score: 1.0,
                illustration: None,
            })
            .collect(),
    }
}
