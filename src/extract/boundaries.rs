//! Splits filtered page text into candidate ad blocks.
//!
//! Boundaries come from an ordered list of named rules. At each line the
//! rules are tried in [`RULE_ORDER`]; the first one that fires decides where
//! the next block starts and where scanning resumes.

use std::ops::Range;

use crate::rules::CompiledRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryRule {
    /// A contact sign-off followed, within a few non-blank lines, by a title
    /// or opening phrase. The block starts at that later line.
    ContactSignOff,
    /// Two or more blank lines with content on both sides.
    BlankRun,
    /// Upper-case title line after a blank line.
    UpperCaseTitle,
    /// Ad-opening phrase ("Vendo", "Se alquila", ...) after a blank line.
    OpeningPhrase,
}

pub const RULE_ORDER: [BoundaryRule; 4] = [
    BoundaryRule::ContactSignOff,
    BoundaryRule::BlankRun,
    BoundaryRule::UpperCaseTitle,
    BoundaryRule::OpeningPhrase,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub line: usize,
    pub rule: BoundaryRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub ordinal: usize,
    pub lines: Range<usize>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct BlockSplit {
    pub blocks: Vec<Block>,
    pub candidates: usize,
    pub dropped: usize,
}

struct Hit {
    boundary: usize,
    resume: usize,
}

struct LineScanner<'a> {
    rules: &'a CompiledRules,
    lines: Vec<&'a str>,
    first_content: Option<usize>,
}

impl<'a> LineScanner<'a> {
    fn new(rules: &'a CompiledRules, text: &'a str) -> Self {
        let lines: Vec<&str> = text.split('\n').map(str::trim).collect();
        let first_content = lines.iter().position(|line| !line.is_empty());
        Self {
            rules,
            lines,
            first_content,
        }
    }

    fn is_blank(&self, index: usize) -> bool {
        self.lines[index].is_empty()
    }

    fn follows_blank(&self, index: usize) -> bool {
        index > 0 && self.is_blank(index - 1)
    }

    fn apply(&self, rule: BoundaryRule, index: usize) -> Option<Hit> {
        let line = self.lines[index];
        if line.is_empty() {
            return None;
        }

        match rule {
            BoundaryRule::ContactSignOff => {
                if !is_sign_off(self.rules, line) {
                    return None;
                }
                self.lookahead_from(index)
            }
            BoundaryRule::BlankRun => {
                let bounded = index >= 2
                    && self.is_blank(index - 1)
                    && self.is_blank(index - 2)
                    && self.first_content.is_some_and(|first| first < index - 2);
                bounded.then_some(Hit {
                    boundary: index,
                    resume: index + 1,
                })
            }
            BoundaryRule::UpperCaseTitle => (self.follows_blank(index)
                && is_title_line(self.rules, line))
            .then_some(Hit {
                boundary: index,
                resume: index + 1,
            }),
            BoundaryRule::OpeningPhrase => (self.follows_blank(index)
                && is_opening_line(self.rules, line))
            .then_some(Hit {
                boundary: index,
                resume: index + 1,
            }),
        }
    }

    /// Looks past a sign-off for the start of the next ad. Further contact
    /// lines are skipped; any other content line ends the search and stays
    /// with the current ad.
    fn lookahead_from(&self, sign_off: usize) -> Option<Hit> {
        let mut seen = 0;
        let mut index = sign_off + 1;

        while index < self.lines.len() && seen < self.rules.sign_off_lookahead {
            let line = self.lines[index];
            if line.is_empty() {
                index += 1;
                continue;
            }
            seen += 1;

            if is_title_line(self.rules, line) || is_opening_line(self.rules, line) {
                return Some(Hit {
                    boundary: index,
                    resume: index + 1,
                });
            }
            if !is_contact_line(self.rules, line) {
                return None;
            }
            index += 1;
        }

        None
    }

    fn boundaries(&self) -> Vec<Boundary> {
        let mut found = Vec::new();
        let mut index = 0;

        while index < self.lines.len() {
            let hit = RULE_ORDER
                .iter()
                .find_map(|rule| self.apply(*rule, index).map(|hit| (*rule, hit)));

            match hit {
                Some((rule, hit)) => {
                    if hit.boundary > 0 {
                        found.push(Boundary {
                            line: hit.boundary,
                            rule,
                        });
                    }
                    index = hit.resume;
                }
                None => index += 1,
            }
        }

        found
    }
}

pub fn is_title_line(rules: &CompiledRules, line: &str) -> bool {
    let letters = line.chars().filter(|ch| ch.is_alphabetic()).count();
    letters >= 3
        && line.chars().count() >= rules.title_min_chars
        && !line.chars().any(char::is_lowercase)
        && !rules.bare_amount.is_match(line)
        && !rules.title_exclusion.is_match(line)
}

pub fn is_opening_line(rules: &CompiledRules, line: &str) -> bool {
    rules.opening.iter().any(|pattern| pattern.is_match(line))
}

pub fn is_sign_off(rules: &CompiledRules, line: &str) -> bool {
    rules.sign_off.iter().any(|pattern| pattern.is_match(line))
}

pub fn is_contact_line(rules: &CompiledRules, line: &str) -> bool {
    rules.contact_line.is_match(line) || is_sign_off(rules, line)
}

/// Where each new block starts, with the rule that placed it. Line 0 is
/// always a start and is not reported.
pub fn boundary_starts(rules: &CompiledRules, text: &str) -> Vec<Boundary> {
    LineScanner::new(rules, text).boundaries()
}

/// Partitions the lines of `text` (split on `'\n'`) into consecutive
/// half-open ranges that cover every line exactly once.
pub fn detect_boundaries(rules: &CompiledRules, text: &str) -> Vec<Range<usize>> {
    let line_count = text.split('\n').count();
    let mut starts: Vec<usize> = vec![0];
    starts.extend(
        boundary_starts(rules, text)
            .into_iter()
            .map(|boundary| boundary.line),
    );

    let mut ranges = Vec::with_capacity(starts.len());
    for (position, start) in starts.iter().enumerate() {
        let end = starts.get(position + 1).copied().unwrap_or(line_count);
        ranges.push(*start..end);
    }
    ranges
}

/// Turns boundary ranges into block texts, dropping those under the minimum
/// length as noise.
pub fn split_blocks(rules: &CompiledRules, text: &str) -> BlockSplit {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut split = BlockSplit::default();

    for (ordinal, range) in detect_boundaries(rules, text).into_iter().enumerate() {
        let body = lines[range.clone()]
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if body.is_empty() {
            continue;
        }
        split.candidates += 1;

        if body.chars().count() < rules.min_block_chars {
            split.dropped += 1;
            continue;
        }

        split.blocks.push(Block {
            ordinal,
            lines: range,
            text: body,
        });
    }

    split
}
