//! Plain-text tables for control-plane responses

use std::path::Path;

use crate::domain::{Task, format_duration};

const SHORT_HEADERS: [&str; 5] = ["[ID]", "Command", "Path", "Status", "LogFile"];

const LONG_HEADERS: [&str; 9] = [
    "[ID]", "Command", "Path", "Queue", "Exec", "ExitCode", "Status", "Error", "LogFile",
];

/// Column-aligned table rendered to a string
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cols.into_iter().map(Into::into).collect());
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i >= widths.len() {
                    widths.push(0);
                }
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let mut out = format_row(&self.headers, &widths);
        for row in &self.rows {
            out.push('\n');
            out.push_str(&format_row(row, &widths));
        }
        out
    }
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    let mut out = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        // No trailing padding on the last column
        if i + 1 < row.len() {
            let pad = widths.get(i).copied().unwrap_or(0).saturating_sub(cell.chars().count());
            out.extend(std::iter::repeat_n(' ', pad));
        }
    }
    out
}

fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "-".to_string(), |p| p.display().to_string())
}

fn short_row(task: &Task) -> Vec<String> {
    vec![
        format!("[{}]", task.id),
        task.command.clone(),
        task.path.display().to_string(),
        task.status.to_string(),
        display_path(task.log_file.as_deref()),
    ]
}

fn long_row(task: &Task) -> Vec<String> {
    vec![
        format!("[{}]", task.id),
        task.command.clone(),
        task.path.display().to_string(),
        format_duration(task.queue_duration()),
        format_duration(task.run_duration()),
        task.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string()),
        task.status.to_string(),
        task.error.clone().unwrap_or_else(|| "-".to_string()),
        display_path(task.log_file.as_deref()),
    ]
}

/// Header plus one row per task, in ascending id order
pub fn format_listing(tasks: &[Task], short: bool) -> String {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by_key(|t| t.id);

    let mut table = if short {
        Table::new(SHORT_HEADERS)
    } else {
        Table::new(LONG_HEADERS)
    };
    for task in sorted {
        table.row(if short { short_row(task) } else { long_row(task) });
    }
    table.render()
}

/// A single task in long form
pub fn format_task(task: &Task) -> String {
    format_listing(std::slice::from_ref(task), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use chrono::Utc;

    fn task(id: u64, command: &str, status: TaskStatus) -> Task {
        let mut t = Task::new(command, "/work");
        t.id = id;
        t.status = status;
        t
    }

    #[test]
    fn test_table_aligns_columns() {
        let mut table = Table::new(["A", "B"]);
        table.row(["long-cell", "x"]);
        table.row(["s", "y"]);

        let rendered = table.render();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[0], "A          B");
        assert_eq!(lines[1], "long-cell  x");
        assert_eq!(lines[2], "s          y");
    }

    #[test]
    fn test_short_listing_columns() {
        let mut t = task(1, "echo hi", TaskStatus::Running);
        t.log_file = Some("/store/1.log".into());

        let out = format_listing(&[t], true);
        let lines: Vec<_> = out.lines().collect();
        assert!(lines[0].starts_with("[ID]"));
        assert!(lines[0].contains("LogFile"));
        assert!(!lines[0].contains("ExitCode"));
        assert!(lines[1].contains("echo hi"));
        assert!(lines[1].contains("running"));
        assert!(lines[1].contains("/store/1.log"));
    }

    #[test]
    fn test_listing_is_sorted_by_id() {
        let tasks = vec![
            task(3, "third", TaskStatus::Queued),
            task(1, "first", TaskStatus::Success),
            task(2, "second", TaskStatus::Removed),
        ];

        let out = format_listing(&tasks, true);
        let lines: Vec<_> = out.lines().skip(1).collect();
        assert!(lines[0].starts_with("[1]"));
        assert!(lines[1].starts_with("[2]"));
        assert!(lines[2].starts_with("[3]"));
    }

    #[test]
    fn test_long_form_shows_exit_code_and_error() {
        let mut t = task(4, "exit 2", TaskStatus::Queued);
        let now = Utc::now();
        t.enqueue_time = Some(now);
        t.start_time = Some(now);
        t.finish(Some(2), Some("exit status: 2".to_string()));

        let out = format_task(&t);
        assert!(out.lines().next().unwrap().contains("ExitCode"));
        let row = out.lines().nth(1).unwrap();
        assert!(row.contains("failed"));
        assert!(row.contains("exit status: 2"));
        assert!(row.contains("0h 0m 0s"));
    }

    #[test]
    fn test_unknown_values_render_as_dash() {
        let out = format_task(&task(5, "true", TaskStatus::Queued));
        let row = out.lines().nth(1).unwrap();
        assert!(row.ends_with('-'));
        assert!(row.contains(" - "));
    }

    #[test]
    fn test_empty_listing_is_header_only() {
        assert_eq!(format_listing(&[], true).lines().count(), 1);
    }
}
