//! invigil CLI — headless driver for proctored exam sessions.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "invigil", version, about = "Proctored exam session engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a headless session against a real exam server
    Run {
        /// Exam definition TOML file
        #[arg(long)]
        exam: PathBuf,

        /// Student identifier
        #[arg(long)]
        student: String,

        /// TOML file mapping question ids to option letters
        #[arg(long)]
        answers: Option<PathBuf>,

        /// Submit this many seconds after starting instead of waiting for
        /// the server to call time
        #[arg(long)]
        submit_after: Option<u64>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a fully local simulated session against mock collaborators
    Simulate {
        /// Number of questions in the generated exam
        #[arg(long, default_value = "9")]
        questions: usize,

        /// Leave this many questions unanswered
        #[arg(long, default_value = "0")]
        unanswered: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("invigil=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            exam,
            student,
            answers,
            submit_after,
            config,
        } => commands::run::execute(exam, student, answers, submit_after, config).await,
        Commands::Simulate {
            questions,
            unanswered,
        } => commands::simulate::execute(questions, unanswered).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
