use regex::Regex;

/// A page split into its prose remainder and the table blocks found on it.
#[derive(Debug, Default, PartialEq)]
pub(super) struct PageLayout {
    pub prose: String,
    pub tables: Vec<Vec<Vec<String>>>,
}

/// A line is a table row when the layout gap between columns (two or more
/// spaces) splits it into at least two cells. Two or more consecutive rows
/// make a table block; a lone row stays in the prose.
pub(super) fn split_page_layout(page: &str, cell_split_regex: &Regex) -> PageLayout {
    let mut layout = PageLayout::default();
    let mut prose_lines = Vec::<&str>::new();
    let mut pending_rows = Vec::<(&str, Vec<String>)>::new();

    for line in page.lines() {
        let cells = split_table_cells(line, cell_split_regex);
        if cells.len() >= 2 {
            pending_rows.push((line, cells));
            continue;
        }
        flush_rows(&mut pending_rows, &mut prose_lines, &mut layout.tables);
        prose_lines.push(line);
    }
    flush_rows(&mut pending_rows, &mut prose_lines, &mut layout.tables);

    layout.prose = prose_lines
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<&str>>()
        .join("\n")
        .trim()
        .to_string();
    layout
}

fn flush_rows<'a>(
    pending_rows: &mut Vec<(&'a str, Vec<String>)>,
    prose_lines: &mut Vec<&'a str>,
    tables: &mut Vec<Vec<Vec<String>>>,
) {
    match pending_rows.len() {
        0 => {}
        1 => prose_lines.extend(pending_rows.drain(..).map(|(line, _)| line)),
        _ => tables.push(pending_rows.drain(..).map(|(_, cells)| cells).collect()),
    }
}

pub(super) fn split_table_cells(line: &str, cell_split_regex: &Regex) -> Vec<String> {
    cell_split_regex
        .split(line.trim())
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// One row per line, cells joined with ` | ` so label/value pairs stay on
/// the same line.
pub(super) fn render_table(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| row.join(" | "))
        .collect::<Vec<String>>()
        .join("\n")
}
