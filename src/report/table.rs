//! Minimal ASCII table renderer.

/// Column alignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Align {
    /// Pad on the right.
    Left,
    /// Pad on the left.
    Right,
}

/// Plain-text table with a header row and `+---+` borders.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Table {
    headers: Vec<(String, Align)>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates a table with the given column headers and alignments.
    #[must_use]
    pub fn new(headers: &[(&str, Align)]) -> Self {
        Self {
            headers: headers
                .iter()
                .map(|(title, align)| ((*title).to_owned(), *align))
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. Missing cells render empty; extra cells are dropped.
    pub fn push_row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    /// Returns `true` when the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(column, (title, _))| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(column))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(title.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Renders the table, ending with a newline.
    #[must_use]
    pub fn render(&self) -> String {
        let widths = self.widths();
        let border = widths.iter().fold(String::from("+"), |mut line, width| {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
            line
        });

        let mut out = String::new();
        let header: Vec<&str> = self.headers.iter().map(|(title, _)| title.as_str()).collect();
        out.push_str(&border);
        out.push('\n');
        self.render_line(&mut out, &widths, &header, true);
        out.push_str(&border);
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            self.render_line(&mut out, &widths, &cells, false);
        }
        out.push_str(&border);
        out.push('\n');
        out
    }

    fn render_line(&self, out: &mut String, widths: &[usize], cells: &[&str], header: bool) {
        out.push('|');
        for (column, ((_, align), &width)) in self.headers.iter().zip(widths).enumerate() {
            let cell = cells.get(column).copied().unwrap_or("");
            let effective = if header { Align::Left } else { *align };
            let padded = match effective {
                Align::Left => format!(" {cell:<width$} |"),
                Align::Right => format!(" {cell:>width$} |"),
            };
            out.push_str(&padded);
        }
        out.push('\n');
    }
}
