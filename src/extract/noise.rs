use crate::rules::CompiledRules;

/// Longest run of blank lines kept after filtering.
const MAX_BLANK_RUN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPage {
    pub text: String,
    pub removed: usize,
}

/// Removes publication boilerplate, then caps blank-line runs at two.
///
/// Every pattern only deletes text, so the order in which they run does not
/// change which content lines survive.
pub fn filter(rules: &CompiledRules, page_text: &str) -> FilteredPage {
    let mut text = page_text.replace("\r\n", "\n").replace('\r', "\n");
    let mut removed = 0;

    for pattern in &rules.boilerplate {
        let hits = pattern
            .find_iter(&text)
            .filter(|hit| !hit.as_str().is_empty())
            .count();
        if hits == 0 {
            continue;
        }
        removed += hits;
        text = pattern.replace_all(&text, "").into_owned();
    }

    FilteredPage {
        text: collapse_blank_runs(&text),
        removed,
    }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;

    for line in text.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= MAX_BLANK_RUN {
                lines.push("");
            }
        } else {
            blank_run = 0;
            lines.push(line.trim_end());
        }
    }

    let start = lines
        .iter()
        .position(|line| !line.is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|line| !line.is_empty())
        .map_or(start, |index| index + 1);

    lines[start..end].join("\n")
}
