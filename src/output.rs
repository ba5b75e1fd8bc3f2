use console::style;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

use crate::mermaid::{DetectionReport, FixOutcome};

/// Context lines kept around each change in a diff hunk.
pub const DIFF_CONTEXT: usize = 3;

/// Terminal rendering for command results.
///
/// Results go to `out`. Status lines go to `out` as well, except in JSON mode
/// where they move to `status` so `out` stays one JSON document.
pub struct OutputHandler {
    json: bool,
    out: Box<dyn Write + Send>,
    status: Box<dyn Write + Send>,
}

impl OutputHandler {
    pub fn new() -> Self {
        Self::with_writers(io::stdout(), io::stderr())
    }

    pub fn with_writers(out: impl Write + Send + 'static, status: impl Write + Send + 'static) -> Self {
        Self {
            json: false,
            out: Box::new(out),
            status: Box::new(status),
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn print_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let text = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    pub fn print_check_report(&mut self, path: &Path, report: &DetectionReport) -> io::Result<()> {
        if !report.has_errors {
            writeln!(
                self.out,
                "{} {} ({} diagram(s))",
                style("✓").green().bold(),
                path.display(),
                report.checked
            )?;
            return Ok(());
        }

        writeln!(
            self.out,
            "{} {} ({} of {} diagram(s) invalid)",
            style("✗").red().bold(),
            path.display(),
            report.errors.len(),
            report.checked
        )?;
        for error in &report.errors {
            let mut lines = error.error.lines();
            let first = lines.next().unwrap_or("syntax error");
            writeln!(self.out, "  {}:{} {}", path.display(), error.line, style(first).red())?;
            for rest in lines {
                writeln!(self.out, "      {}", style(rest).dim())?;
            }
        }
        Ok(())
    }

    pub fn print_summary(&mut self, files: usize, blocks: usize, invalid: usize) -> io::Result<()> {
        let line = format!(
            "{} file(s), {} diagram(s), {} invalid",
            files, blocks, invalid
        );
        if invalid == 0 {
            writeln!(self.out, "{}", style(line).green())
        } else {
            writeln!(self.out, "{}", style(line).yellow().bold())
        }
    }

    pub fn print_fix_outcome(&mut self, outcome: &FixOutcome) -> io::Result<()> {
        let repaired = outcome.blocks.iter().filter(|b| b.fixed_code().is_some()).count();
        let invalid = outcome.blocks.iter().filter(|b| !b.is_valid()).count();
        writeln!(
            self.out,
            "{}",
            style(format!(
                "Repaired {} of {} invalid diagram(s)",
                repaired, invalid
            ))
            .bold()
        )
    }

    /// Unified diff between the original and the patched document.
    pub fn print_diff(&mut self, path: &Path, before: &str, after: &str) -> io::Result<()> {
        let diff = unified_diff(before, after, DIFF_CONTEXT);
        if diff.is_empty() {
            return Ok(());
        }

        writeln!(self.out, "{}", style(format!("--- a/{}", path.display())).bold())?;
        writeln!(self.out, "{}", style(format!("+++ b/{}", path.display())).bold())?;
        for line in diff.lines() {
            let styled = match line.as_bytes().first() {
                Some(b'@') => style(line).cyan(),
                Some(b'-') => style(line).red(),
                Some(b'+') => style(line).green(),
                _ => style(line).dim(),
            };
            writeln!(self.out, "{}", styled)?;
        }
        self.out.flush()
    }

    /// Plain text on the result stream, such as the config dump.
    pub fn print_text(&mut self, content: &str) -> io::Result<()> {
        write!(self.out, "{}", content)?;
        self.out.flush()
    }

    pub fn print_system(&mut self, content: &str) -> io::Result<()> {
        let target = if self.json { &mut self.status } else { &mut self.out };
        writeln!(target, "{}", style(content).yellow().dim())?;
        target.flush()
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a unified diff (`@@ -a,b +c,d @@` hunks) of two texts, keeping
/// `context` unchanged lines around each change. Identical texts give "".
pub fn unified_diff(before: &str, after: &str, context: usize) -> String {
    let ops = diff::lines(before, after);

    // Lines of each side consumed before op `i`.
    let mut old_pos = Vec::with_capacity(ops.len() + 1);
    let mut new_pos = Vec::with_capacity(ops.len() + 1);
    let (mut old, mut new) = (0usize, 0usize);
    for op in &ops {
        old_pos.push(old);
        new_pos.push(new);
        match op {
            diff::Result::Left(_) => old += 1,
            diff::Result::Right(_) => new += 1,
            diff::Result::Both(..) => {
                old += 1;
                new += 1;
            }
        }
    }
    old_pos.push(old);
    new_pos.push(new);

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        if matches!(op, diff::Result::Both(..)) {
            continue;
        }
        let start = idx.saturating_sub(context);
        let end = (idx + context + 1).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => hunks.push((start, end)),
        }
    }

    let mut out = String::new();
    for (start, end) in hunks {
        let old_count = old_pos[end] - old_pos[start];
        let new_count = new_pos[end] - new_pos[start];
        // An empty side is addressed by the line before it.
        let old_start = if old_count == 0 { old_pos[start] } else { old_pos[start] + 1 };
        let new_start = if new_count == 0 { new_pos[start] } else { new_pos[start] + 1 };
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start, old_count, new_start, new_count
        ));

        for op in &ops[start..end] {
            let (prefix, line) = match op {
                diff::Result::Left(line) => ('-', *line),
                diff::Result::Right(line) => ('+', *line),
                diff::Result::Both(line, _) => (' ', *line),
            };
            out.push(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
