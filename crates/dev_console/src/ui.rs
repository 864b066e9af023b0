//! Box-drawing helpers for console output.

fn width(text: &str) -> usize {
    text.chars().count()
}

fn pad(text: &str, target: usize) -> String {
    let mut padded = text.to_string();
    padded.extend(std::iter::repeat(' ').take(target.saturating_sub(width(text))));
    padded
}

/// Draws `lines` inside a double-line box with a centered title.
pub fn render_box(title: &str, lines: &[String]) -> String {
    let inner = lines
        .iter()
        .map(|l| width(l))
        .chain(std::iter::once(width(title)))
        .max()
        .unwrap_or(0)
        + 2;

    let mut out = String::new();
    out.push_str(&format!("╔{}╗\n", "═".repeat(inner)));
    let left = (inner - width(title)) / 2;
    out.push_str(&format!(
        "║{}{}║\n",
        " ".repeat(left),
        pad(title, inner - left)
    ));
    if !lines.is_empty() {
        out.push_str(&format!("╟{}╢\n", "─".repeat(inner)));
        for line in lines {
            out.push_str(&format!("║ {}║\n", pad(line, inner - 1)));
        }
    }
    out.push_str(&format!("╚{}╝", "═".repeat(inner)));
    out
}

/// Draws a table with a header row. Short rows are padded with blanks.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| width(h)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(headers.len()) {
            widths[i] = widths[i].max(width(cell));
        }
    }

    let border = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    };
    let line = |cells: Vec<&str>| {
        let cells: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, w)| format!(" {} ", pad(cells.get(i).copied().unwrap_or(""), *w)))
            .collect();
        format!("│{}│", cells.join("│"))
    };

    let mut out = vec![border("┌", "┬", "┐"), line(headers.to_vec()), border("├", "┼", "┤")];
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.push(border("└", "┴", "┘"));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_lines_share_width() {
        let rendered = render_box("Status", &["name: hub".to_string(), "players: 3".to_string()]);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("Status"));
        let first = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == first));
    }

    #[test]
    fn test_table_layout() {
        let rows = vec![
            vec!["hub".to_string(), "25565".to_string()],
            vec!["arena-long".to_string()],
        ];
        let rendered = render_table(&["Name", "Port"], &rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "│ Name       │ Port  │");
        assert_eq!(lines[3], "│ hub        │ 25565 │");
        assert_eq!(lines[4], "│ arena-long │       │");
    }

    #[test]
    fn test_empty_box() {
        assert_eq!(render_box("x", &[]), "╔═══╗\n║ x ║\n╚═══╝");
    }
}
