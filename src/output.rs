//! Console output helpers and size formatting.

use owo_colors::OwoColorize;

use crate::ProgressSink;

/// Colors are enabled only when output is a TTY.
fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub fn print_info(msg: &str) {
    if is_tty() {
        println!("{} {}", "info:".cyan().bold(), msg);
    } else {
        println!("info: {}", msg);
    }
}

pub fn print_warn(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {}", msg);
    }
}

pub fn print_error(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {}", msg);
    }
}

pub fn print_success(msg: &str) {
    if is_tty() {
        println!("{} {}", "ok:".green().bold(), msg);
    } else {
        println!("ok: {}", msg);
    }
}

/// Print a plain user-facing line (no prefix). Operation summaries and the
/// final report go through this; users may script against them.
pub fn print_user(msg: &str) {
    println!("{}", msg);
}

/// Progress sink that prints each operation summary as a plain line.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn line(&mut self, line: &str) {
        print_user(line);
    }
}

/// Signed human-readable size with integer division: "+1023 bytes", "-1 KB".
pub fn human_size(n: i64) -> String {
    const UNITS: [&str; 6] = ["bytes", "KB", "MB", "GB", "TB", "PB"];
    let sign = if n < 0 { "-" } else { "+" };
    let mut value = n.unsigned_abs();
    let mut unit = 0;
    while value >= 1024 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }
    format!("{sign}{value} {}", UNITS[unit])
}
