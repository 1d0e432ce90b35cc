use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::client::{AppState, AuthView};
use crate::config::Config;
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true) && io::stdout().is_terminal();

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn render(&self, state: &AppState) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.render_to(out, state)
    }

    pub fn render_to<W: Write>(&self, mut out: W, state: &AppState) -> anyhow::Result<()> {
        let Some(user) = state.user.as_ref() else {
            match state.auth_view {
                AuthView::Login => {
                    writeln!(out, "Not logged in. Log in with: tasklist login <email>")?
                }
                AuthView::Register => writeln!(
                    out,
                    "Not logged in. Register with: tasklist register <email> <username>"
                )?,
            }
            if let Some(error) = state.error.as_deref() {
                writeln!(out, "{}", self.paint(error, "31"))?;
            }
            return Ok(());
        };

        writeln!(out, "Logged in as {} <{}>", user.username, user.email)?;
        if let Some(error) = state.error.as_deref() {
            writeln!(out, "{}", self.paint(error, "31"))?;
        }

        if state.loading {
            writeln!(out, "Loading...")?;
        } else if state.tasks.is_empty() {
            writeln!(out, "No tasks.")?;
        } else {
            self.write_tasks(&mut out, state)?;
        }

        if state.confirm_open {
            let ids: Vec<String> = state.pending_delete.iter().map(|id| id.to_string()).collect();
            writeln!(out)?;
            writeln!(
                out,
                "Delete {} cancelled task(s): {}?",
                ids.len(),
                ids.join(", ")
            )?;
        }

        Ok(())
    }

    fn write_tasks<W: Write>(&self, out: &mut W, state: &AppState) -> anyhow::Result<()> {
        let headers = vec![
            "Sel".to_string(),
            "ID".to_string(),
            "Status".to_string(),
            "Title".to_string(),
            "Description".to_string(),
        ];

        let rows = state
            .tasks
            .iter()
            .map(|task| {
                let mark = if state.is_selected(task.id) { "[x]" } else { "[ ]" };
                vec![
                    mark.to_string(),
                    self.paint(&task.id.to_string(), "33"),
                    self.paint_status(task),
                    task.title.clone(),
                    task.description_text().to_string(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    fn paint_status(&self, task: &Task) -> String {
        let code = match task.status {
            TaskStatus::Todo => return task.status.to_string(),
            TaskStatus::InProgress => "36",
            TaskStatus::Completed => "32",
            TaskStatus::OnHold => "35",
            TaskStatus::Cancelled => "90",
        };
        self.paint(task.status.as_str(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
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

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
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
