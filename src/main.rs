//  ██████╗ █████╗ ██╗   ██╗███████╗███████╗    ██╗     ██╗███████╗████████╗
// ██╔════╝██╔══██╗██║   ██║██╔════╝██╔════╝    ██║     ██║██╔════╝╚══██╔══╝
// ██║     ███████║██║   ██║███████╗█████╗      ██║     ██║███████╗   ██║
// ██║     ██╔══██║██║   ██║╚════██║██╔══╝      ██║     ██║╚════██║   ██║
// ╚██████╗██║  ██║╚██████╔╝███████║███████╗    ███████╗██║███████║   ██║
//  ╚═════╝╚═╝  ╚═╝ ╚═════╝ ╚══════╝╚══════╝    ╚══════╝╚═╝╚══════╝   ╚═╝
//
// E N G I N E
//
// Command-line front end. Every subcommand maps to one orchestrator
// operation and prints its FetchResult as JSON on stdout. Logs go to
// stderr so the output stays pipeable. Ctrl-C cancels whatever is running.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cause_list_engine::portal::captcha::CaptchaSolver;
use cause_list_engine::{
    cancel_pair, CancelToken, ComplexPath, Config, CourtPath, DistrictPath, FetchResult,
    OperatorPrompt, OperatorSolver, PdfDocument, PortalLayout, RequestOrchestrator,
};

#[derive(Debug, Parser)]
#[command(name = "cause-list", version, about = "Query the eCourts cause-list portal")]
struct Cli {
    /// Answer CAPTCHAs yourself: the challenge image is saved to disk and
    /// the answer is read from stdin.
    #[arg(long, global = true)]
    operator: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "CAUSE_LIST_LOG_JSON")]
    log_json: bool,

    /// Print engine counters to stderr when done.
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List states.
    States,
    /// List districts of a state.
    Districts { state: String },
    /// List court complexes of a district.
    Complexes { state: String, district: String },
    /// List courts of a complex.
    Courts {
        state: String,
        district: String,
        complex: String,
    },
    /// Cause list of one court on a date (YYYY-MM-DD).
    CauseList {
        state: String,
        district: String,
        complex: String,
        court: String,
        date: NaiveDate,
    },
    /// Cause lists of every court in a complex on a date (YYYY-MM-DD).
    ComplexCauseList {
        state: String,
        district: String,
        complex: String,
        date: NaiveDate,
    },
    /// Download the cause-list PDF of one court on a date (YYYY-MM-DD).
    Pdf {
        state: String,
        district: String,
        complex: String,
        court: String,
        date: NaiveDate,
        /// Directory to write the PDF into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Download the cause-list PDF of every court in a complex on a date
    /// (YYYY-MM-DD). Courts that fail are listed in the output.
    ComplexPdf {
        state: String,
        district: String,
        complex: String,
        date: NaiveDate,
        /// Directory to write the PDFs into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::from_env();
    let layout = PortalLayout::from_env();

    let engine = if cli.operator {
        let (solver, prompts) = OperatorSolver::channel(1, config.captcha_solver_timeout);
        tokio::spawn(answer_prompts(prompts));
        let solver: Arc<dyn CaptchaSolver> = Arc::new(solver);
        RequestOrchestrator::new(config, layout, solver)
    } else {
        RequestOrchestrator::from_config(config, layout)
    }
    .context("failed to start the cause list engine")?;

    let (cancel, token) = cancel_pair();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling");
            cancel.cancel();
        }
    });

    let failed = execute(&engine, cli.command, &token).await?;

    if cli.stats {
        eprintln!("{}", serde_json::to_string_pretty(&engine.status())?);
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Run one subcommand, print its result, and report whether it failed.
async fn execute(engine: &RequestOrchestrator, command: Command, token: &CancelToken) -> anyhow::Result<bool> {
    match command {
        Command::States => print(&engine.get_states(token).await),
        Command::Districts { state } => print(&engine.get_districts(&state, token).await),
        Command::Complexes { state, district } => {
            let path = DistrictPath::new(state, district);
            print(&engine.get_complexes(&path, token).await)
        }
        Command::Courts {
            state,
            district,
            complex,
        } => {
            let path = ComplexPath::new(state, district, complex);
            print(&engine.get_courts(&path, token).await)
        }
        Command::CauseList {
            state,
            district,
            complex,
            court,
            date,
        } => {
            let path = CourtPath::new(state, district, complex, court);
            print(&engine.fetch_cause_list(&path, date, token).await)
        }
        Command::ComplexCauseList {
            state,
            district,
            complex,
            date,
        } => {
            let path = ComplexPath::new(state, district, complex);
            print(&engine.fetch_cause_list_for_complex(&path, date, token).await)
        }
        Command::Pdf {
            state,
            district,
            complex,
            court,
            date,
            out_dir,
        } => {
            let path = CourtPath::new(state, district, complex, court);
            let result = engine.fetch_pdf(&path, date, token).await;
            if let FetchResult::Success(document) = &result {
                save_pdf(&out_dir, document).await?;
            }
            print(&result)
        }
        Command::ComplexPdf {
            state,
            district,
            complex,
            date,
            out_dir,
        } => {
            let path = ComplexPath::new(state, district, complex);
            let result = engine.fetch_pdfs_for_complex(&path, date, token).await;
            for document in result.payload().into_iter().flatten() {
                save_pdf(&out_dir, document).await?;
            }
            print(&result)
        }
    }
}

async fn save_pdf(out_dir: &Path, document: &PdfDocument) -> anyhow::Result<()> {
    let target = out_dir.join(&document.suggested_file_name);
    tokio::fs::write(&target, &document.bytes)
        .await
        .with_context(|| format!("writing {}", target.display()))?;
    info!(path = %target.display(), "PDF saved");
    Ok(())
}

fn print<T: Serialize>(result: &FetchResult<T>) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(result.is_failure())
}

/// Terminal operator: save each challenge image, ask for the answer on
/// stdin. An empty line skips the challenge.
async fn answer_prompts(mut prompts: tokio::sync::mpsc::Receiver<OperatorPrompt>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(prompt) = prompts.recv().await {
        let file = std::env::temp_dir().join(format!("cause_list_captcha_{}.png", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&file, &prompt.challenge.image).await {
            warn!(error = %e, "Could not save CAPTCHA image");
        }
        eprintln!(
            "CAPTCHA for {} saved to {}. Type the answer and press Enter:",
            prompt.challenge.endpoint.name(),
            file.display()
        );

        match lines.next_line().await {
            Ok(Some(answer)) if !answer.trim().is_empty() => {
                let _ = prompt.reply.send(answer);
            }
            // Dropping the reply sender fails the challenge.
            _ => continue,
        }
    }
}
