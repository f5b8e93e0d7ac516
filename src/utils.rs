use colored::*;
use std::path::{Path, PathBuf};

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{}", error_line(message));
}

fn error_line(message: &str) -> String {
    format!("{} {}", "✗".red().bold(), message.red())
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Expand `~` and make `input` absolute relative to `cwd`
pub fn expand_path(input: &str, cwd: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(input).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}
