//! CLI output formatting utilities.

use crate::events::{Event, EventKind, REQUEST_CONFIRMATION};
use crate::session::Session;
use console::{style, Style};
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print agent text.
    pub fn agent(name: &str, text: &str) {
        println!("\n{} {}\n", style(format!("{}:", name)).cyan().bold(), text);
    }

    /// Print session info.
    pub fn session_info(session: &Session) {
        println!(
            "  {} {} ({} events, updated {})",
            style("*").cyan(),
            style(&session.key.session_id).bold(),
            session.event_count,
            style(session.updated_at.format("%Y-%m-%d %H:%M:%S")).dim()
        );
    }

    /// Print one event of a trace.
    pub fn event(event: &Event) {
        let time = event.timestamp.format("%H:%M:%S");
        let line = match &event.kind {
            EventKind::Text { text } => content_preview(text, 200),
            EventKind::FunctionCall { id, name, args } if name == REQUEST_CONFIRMATION => format!(
                "{} approval_id={} {}",
                style("request_confirmation").yellow().bold(),
                id,
                style(content_preview(&args.to_string(), 160)).dim()
            ),
            EventKind::FunctionCall { name, args, .. } => format!(
                "{} {}",
                style(format!("call {}", name)).magenta(),
                style(content_preview(&args.to_string(), 160)).dim()
            ),
            EventKind::FunctionResult { name, payload, .. } => format!(
                "{} {}",
                style(format!("result {}", name)).green(),
                style(content_preview(&payload.to_string(), 160)).dim()
            ),
        };
        println!(
            "  {} {} {}",
            style(time).dim(),
            style(format!("[{}]", event.author)).cyan(),
            line
        );
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }

    /// Style for dim text.
    pub fn dim_style() -> Style {
        Style::new().dim()
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_len: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_len {
        content
    } else {
        let truncated: String = content.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_preview() {
        assert_eq!(content_preview("short", 10), "short");
        assert_eq!(content_preview("line\nbreak", 20), "line break");
        assert_eq!(content_preview("abcdefghij", 4), "abcd...");
        assert_eq!(content_preview("ååååå", 2), "åå...");
    }
}
