//! Formatted output helpers for CLI commands.

/// Renders rows as a left-aligned table, each column padded to its widest
/// cell plus two spaces. The last column is not padded.
#[must_use]
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers.iter().map(ToString::to_string).collect();
    std::iter::once(&header_row)
        .chain(rows)
        .map(|row| format_row(row, &widths))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    let last = row.len().saturating_sub(1);
    let mut line = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i == last {
            line.push_str(cell);
        } else {
            let width = widths.get(i).copied().unwrap_or(cell.len()) + 2;
            line.push_str(&format!("{cell:<width$}"));
        }
    }
    line
}

/// Shows a missing pid as an empty cell.
#[must_use]
pub fn format_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_widest_cell() {
        let table = format_table(
            &["NAME", "PID"],
            &[
                vec!["web".into(), "42".into()],
                vec!["database".into(), "7".into()],
            ],
        );
        assert_eq!(table, "NAME      PID\nweb       42\ndatabase  7");
    }

    #[test]
    fn empty_table_has_only_headers() {
        assert_eq!(format_table(&["NAME", "DRIVER"], &[]), "NAME  DRIVER");
    }

    #[test]
    fn missing_pid_is_blank() {
        assert_eq!(format_pid(None), "");
        assert_eq!(format_pid(Some(12)), "12");
    }
}
