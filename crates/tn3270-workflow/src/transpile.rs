//! Line-oriented input-file transpiler.
//!
//! Recorded terminal scripts can replace the `Steps` array: each recognized
//! line becomes one step, and the list is wrapped in Connect/Disconnect.
//! Recognized forms:
//!
//! - `yield ps.sendKeys('ControlKey.TAB');` — a key press; plain text
//!   becomes a FillString at the current cursor
//! - `yield wait.forText('TEXT', new Position(r, c));` — a CheckValue
//! - `// ... at row R column C` immediately followed by a `sendKeys` line —
//!   a FillString at (R, C), consuming both lines
//!
//! Unrecognized lines are skipped.

use crate::model::Step;
use std::path::Path;
use tn3270_common::{WorkflowError, WorkflowResult};
use tn3270_emulator::AidKey;
use tracing::debug;

/// Reads and transpiles an input file into a step list.
pub fn load_input_file(path: &Path) -> WorkflowResult<Vec<Step>> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        WorkflowError::config(format!("error reading input file {}: {e}", path.display()))
    })?;
    Ok(transpile(&data))
}

/// Transpiles input-file text into a step list.
pub fn transpile(source: &str) -> Vec<Step> {
    let mut steps = vec![Step::Connect];
    let lines: Vec<&str> = source.lines().collect();

    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx].trim();
        idx += 1;
        if line.is_empty() {
            continue;
        }

        if let Some(argument) = send_keys_argument(line) {
            steps.push(send_keys_step(&argument, 0, 0));
        } else if line.starts_with("yield wait.forText") {
            if let Some(step) = parse_wait_for_text(line) {
                steps.push(step);
            }
        } else if line.starts_with("//") {
            // A coordinate comment binds the next sendKeys line to a
            // screen position.
            let Some((row, col)) = parse_row_column(line) else {
                continue;
            };
            let Some(next) = lines.get(idx).map(|l| l.trim()) else {
                continue;
            };
            if let Some(text) = send_keys_argument(next) {
                steps.push(send_keys_step(&text, row, col));
                idx += 1;
            }
        } else {
            debug!(line, "Skipping unrecognized input line");
        }
    }

    steps.push(Step::Disconnect);
    steps
}

/// Extracts the quoted argument of a `yield ps.sendKeys(...)` line.
fn send_keys_argument(line: &str) -> Option<String> {
    let rest = line.strip_prefix("yield ps.sendKeys(")?;
    let rest = rest.strip_suffix(");").unwrap_or(rest);
    Some(rest.trim_matches('\'').to_string())
}

/// Maps a sendKeys argument to a step: a control key becomes a press,
/// anything else is typed at (row, col) or the current cursor.
fn send_keys_step(argument: &str, row: u16, col: u16) -> Step {
    if let Some(name) = argument.strip_prefix("ControlKey.") {
        let key = match name {
            "TAB" => Some(AidKey::Tab),
            "ENTER" => Some(AidKey::Enter),
            _ => name
                .strip_prefix('F')
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=24).contains(n))
                .map(AidKey::Pf),
        };
        if let Some(key) = key {
            return Step::Press(key);
        }
    }
    Step::FillString {
        row,
        col,
        text: argument.to_string(),
    }
}

/// Parses `yield wait.forText('TEXT', new Position(r, c));`.
fn parse_wait_for_text(line: &str) -> Option<Step> {
    let rest = line.strip_prefix("yield wait.forText('")?;
    let (text, rest) = rest.split_once('\'')?;
    let position = rest.split_once("new Position(")?.1;
    let position = position.split(')').next()?;
    let (row, col) = position.split_once(',')?;

    Some(Step::CheckValue {
        row: row.trim().parse().ok()?,
        col: col.trim().parse().ok()?,
        length: text.len() as u16,
        expected: text.to_string(),
    })
}

/// Pulls the numbers following the `row` and `column` words out of a
/// coordinate comment.
fn parse_row_column(line: &str) -> Option<(u16, u16)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let value_after = |word: &str| {
        tokens
            .iter()
            .position(|t| *t == word)
            .and_then(|i| tokens.get(i + 1))
            .and_then(|t| t.trim_end_matches(|c: char| !c.is_ascii_digit()).parse::<u16>().ok())
    };
    Some((value_after("row")?, value_after("column")?))
}
