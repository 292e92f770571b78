mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::DaemonClient;
use shared::ipc::{format_elapsed, Command, Response, SessionStatus};
use std::time::Duration;

/// Starting loads the conversation from the backend before the daemon replies.
const START_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Parser)]
#[command(name = "interviq")]
#[command(about = "CLI tool for the interviq voice interview daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume the interview with this id
    Start { interview_id: String },
    /// End the interview and log its time as incomplete
    End,
    Mute,
    Unmute,
    /// Retry the step that failed
    Retry,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = DaemonClient::new();

    let command = match cli.command {
        Commands::Start { interview_id } => {
            client = client.with_response_timeout(START_TIMEOUT);
            Command::Start(interview_id)
        }
        Commands::End => Command::End,
        Commands::Mute => Command::Mute,
        Commands::Unmute => Command::Unmute,
        Commands::Retry => Command::Retry,
        Commands::Status => Command::Status,
    };

    match client.send_command(command).await {
        Ok(Response::Ok) => {
            println!("Success");
        }
        Ok(Response::Status(status)) => print_status(&status),
        Ok(Response::Error(msg)) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to connect to interviqd: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_status(status: &SessionStatus) {
    println!("Status:");
    println!(
        "  Interview: {}",
        status.interview_id.as_deref().unwrap_or("none")
    );
    println!("  State: {}", status.state);
    println!(
        "  Questions: {} / {}",
        status.question_count.min(status.max_questions),
        status.max_questions
    );
    println!("  Time: {}", format_elapsed(status.elapsed_seconds));
    println!("  Muted: {}", status.muted);
    if status.state == "UserRecording" {
        println!("  Level: {}", level_bar(status.audio_level));
    }
    if status.finished {
        println!("  Interview complete");
    }
    if let Some(error) = &status.last_error {
        println!("  Last error: {} (run `interviq retry`)", error);
    }
}

/// Ten-cell meter for a level in 0..=2.
fn level_bar(level: f32) -> String {
    let filled = ((level.clamp(0.0, 2.0) / 2.0) * 10.0).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(10 - filled))
}
