use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Local, TimeZone};
use unicode_width::UnicodeWidthStr;

use crate::celebrate::Celebration;
use crate::config::Config;
use crate::filter::Filter;
use crate::state::Counts;
use crate::sync::SyncOutcome;
use crate::todo::Todo;

const SHORT_ID_LEN: usize = 8;
const PROGRESS_WIDTH: usize = 20;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, todos))]
    pub fn print_todo_table(&mut self, todos: &[Todo], filter: Filter) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if todos.is_empty() {
            let message = match filter {
                Filter::All => "No tasks yet.",
                Filter::Active => "No active tasks.",
                Filter::Completed => "No completed tasks.",
            };
            writeln!(out, "{message}")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Created".to_string(),
            "Task".to_string(),
        ];

        let rows = todos
            .iter()
            .map(|todo| {
                let id = self.paint(short_id(&todo.id), "33");
                let done = if todo.completed {
                    self.paint("[x]", "32")
                } else {
                    "[ ]".to_string()
                };
                let created = Local
                    .timestamp_millis_opt(todo.created_at)
                    .single()
                    .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let text = match &todo.emoji {
                    Some(emoji) => format!("{emoji} {}", todo.text),
                    None => todo.text.clone(),
                };
                let text = if todo.completed {
                    self.paint(&text, "2;9")
                } else {
                    text
                };
                vec![id, done, created, text]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_counts(&mut self, counts: Counts, backend: &str) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write_counts(&mut out, counts, backend)?;
        Ok(())
    }

    /// Prints the remaining-tasks line; nothing for an empty list.
    pub fn print_status(&mut self, counts: Counts) -> anyhow::Result<()> {
        let Some(line) = status_line(counts) else {
            return Ok(());
        };
        let mut out = io::stdout().lock();
        let line = if counts.active == 0 {
            self.paint(&line, "32")
        } else {
            line
        };
        writeln!(out, "{line}")?;
        Ok(())
    }

    /// `done` is printed on success, `rejected` when nothing changed.
    pub fn print_outcome(
        &mut self,
        outcome: SyncOutcome,
        done: &str,
        rejected: &str,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let line = match outcome {
            SyncOutcome::Saved | SyncOutcome::Confirmed => done.to_string(),
            SyncOutcome::Rejected => rejected.to_string(),
            SyncOutcome::RolledBack => {
                self.paint("Remote store rejected the change; it was reverted.", "31")
            }
        };
        writeln!(out, "{line}")?;
        Ok(())
    }

    pub fn print_celebration(&mut self, celebration: Celebration) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let line = match celebration {
            Celebration::Confetti => self.paint("🎉 Nice work!", "35"),
            Celebration::Grand => self.paint("🏆 Every task is done!", "1;35"),
        };
        writeln!(out, "{line}")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

pub fn status_line(counts: Counts) -> Option<String> {
    match counts.active {
        _ if counts.total == 0 => None,
        0 => Some("All tasks completed!".to_string()),
        1 => Some("1 task remaining".to_string()),
        n => Some(format!("{n} tasks remaining")),
    }
}

fn write_counts<W: Write>(mut writer: W, counts: Counts, backend: &str) -> anyhow::Result<()> {
    let pct = counts.percent_complete() as usize;
    let filled = pct * PROGRESS_WIDTH / 100;
    writeln!(
        writer,
        "total {}  active {}  completed {}",
        counts.total, counts.active, counts.completed
    )?;
    writeln!(
        writer,
        "[{}{}] {pct}%",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled)
    )?;
    if let Some(status) = status_line(counts) {
        writeln!(writer, "{status}")?;
    }
    writeln!(writer, "storage: {backend}")?;
    Ok(())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
