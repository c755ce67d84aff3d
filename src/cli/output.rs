use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static CLAUSE: Emoji<'_, '_> = Emoji("📄 ", "");
pub static ANSWER: Emoji<'_, '_> = Emoji("💬 ", "");

pub fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn print_ok(message: &str) {
    println!("  {} {}", style("✓").green(), message);
}

pub fn print_failed(message: &str) {
    println!("  {} {}", style("✗").red(), message);
}

/// First `max` characters of `text` on a single line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
