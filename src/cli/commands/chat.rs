//! Interactive chat command with approval prompts.

use super::build_runner;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::Result;
use crate::session::SessionKey;
use crate::workflow::{run_workflow, PromptApprover};
use chrono::{DateTime, Local};
use console::style;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Words that end the chat.
const EXIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];

/// Run the interactive chat command.
pub async fn run_chat(
    session_id: &str,
    model: Option<String>,
    no_transcript: bool,
    settings: Settings,
) -> Result<()> {
    // Pre-flight checks
    if let Err(e) = preflight::check(Operation::Agent, &settings) {
        Output::error(&format!("{}", e));
        return Err(e);
    }

    let runner = build_runner(&settings, model.as_deref())?;
    let key = SessionKey::new(
        &settings.session.app_name,
        &settings.session.user_id,
        session_id,
    );
    let transcript = (!no_transcript).then(|| transcript_path(&settings.data_dir(), session_id));

    println!("\n{}", style("Tollgate Chat").bold().cyan());
    println!(
        "{}",
        style("Ask the shipping agent anything. Type 'quit', 'exit', or 'bye' to end the session.")
            .dim()
    );
    if let Some(path) = &transcript {
        println!("{}\n", Output::dim_style().apply_to(format!("Transcript: {}", path.display())));
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            println!();
            Output::info("Goodbye!");
            break;
        }

        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if is_exit(input) {
            Output::info("Goodbye!");
            break;
        }

        match run_workflow(&runner, &key, input, &PromptApprover).await {
            Ok(report) => {
                let reply = report.agent_text.join("\n\n");
                if reply.is_empty() {
                    Output::warning("The agent did not reply.");
                    continue;
                }
                Output::agent(runner.name(), &reply);

                if let Some(path) = &transcript {
                    let written = append_transcript(path, session_id, input, &reply, Local::now());
                    if let Err(e) = written {
                        Output::warning(&format!("Failed to write transcript: {}", e));
                    }
                }
            }
            Err(e) => {
                Output::error(&format!("Error: {}", e));
            }
        }
    }

    Ok(())
}

fn is_exit(input: &str) -> bool {
    EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w))
}

/// Where the markdown transcript of a session is written.
pub fn transcript_path(data_dir: &Path, session_id: &str) -> PathBuf {
    data_dir.join(format!("transcript_{}.md", session_id))
}

/// Append one exchange to a markdown transcript, creating it with a header.
pub fn append_transcript(
    path: &Path,
    session_id: &str,
    user_input: &str,
    agent_reply: &str,
    now: DateTime<Local>,
) -> Result<()> {
    let timestamp = now.format("%Y-%m-%d %H:%M:%S");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let is_new = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    if is_new {
        writeln!(file, "# Shipping Session Transcript: {}", session_id)?;
        writeln!(file, "Started: {}\n", timestamp)?;
    }

    writeln!(file, "## {}\n", timestamp)?;
    writeln!(file, "**User**: {}\n", user_input)?;
    writeln!(file, "**Agent**: {}\n", agent_reply)?;
    writeln!(file, "---\n")?;

    debug!("Appended exchange to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_exit_words() {
        assert!(is_exit("quit"));
        assert!(is_exit("BYE"));
        assert!(is_exit("Exit"));
        assert!(!is_exit("ship 3 containers"));
    }

    #[test]
    fn test_transcript_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = transcript_path(dir.path(), "s1");
        let now = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        append_transcript(&path, "s1", "Ship 3 containers", "ORD-3-AUTO placed", now).unwrap();
        append_transcript(&path, "s1", "Thanks", "You're welcome", now).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(path.ends_with("transcript_s1.md"));
        assert_eq!(content.matches("# Shipping Session Transcript: s1").count(), 1);
        assert!(content.contains("Started: 2024-05-01 12:00:00"));
        assert_eq!(content.matches("**User**:").count(), 2);
        assert!(content.contains("**Agent**: ORD-3-AUTO placed"));
    }
}
