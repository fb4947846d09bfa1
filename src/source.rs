//! Edition folders on disk: page text files plus optional metadata.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use tracing::warn;

use crate::model::{EditionEntry, EditionInfo, PageFileEntry};
use crate::util::{read_json, sha256_file, sha256_text};

pub const INFO_FILENAME: &str = "info.json";
pub const SINGLE_TEXT_FILENAME: &str = "text.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EditionSource {
    pub edition_id: String,
    pub directory: PathBuf,
    pub published_at: NaiveDate,
    pub date_source: String,
    pub pages: Vec<SourcePage>,
    pub files: Vec<PageFileEntry>,
    pub sha256: String,
    pub warnings: Vec<String>,
}

impl EditionSource {
    pub fn to_entry(&self) -> EditionEntry {
        EditionEntry {
            edition_id: self.edition_id.clone(),
            directory: self.directory.display().to_string(),
            published_at: self.published_at,
            date_source: self.date_source.clone(),
            page_count: self.pages.len(),
            sha256: self.sha256.clone(),
            files: self.files.clone(),
        }
    }
}

/// Sub-directories of `editions_dir`, sorted by name.
pub fn discover_edition_dirs(editions_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(editions_dir)
        .with_context(|| format!("failed to read editions directory {}", editions_dir.display()))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", editions_dir.display()))?;
        let path = entry.path();
        if entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_dir()
        {
            dirs.push(path);
        }
    }

    dirs.sort();
    Ok(dirs)
}

/// Reads one edition folder. `year_hint` completes folder-name dates that do
/// not carry a year.
pub fn load_edition(dir: &Path, year_hint: Option<i32>) -> Result<EditionSource> {
    let folder = dir
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid UTF-8 edition folder: {}", dir.display()))?;

    let mut warnings = Vec::new();
    let info_path = dir.join(INFO_FILENAME);
    let info: Option<EditionInfo> = if info_path.exists() {
        Some(read_json(&info_path)?)
    } else {
        None
    };

    let (edition_id, published_at, date_source) = match &info {
        Some(info) => (info.edition_id.clone(), info.published_at, "info".to_string()),
        None => {
            let edition_id = edition_id_from_folder(folder);
            match parse_folder_date(folder, year_hint) {
                Some(date) => (edition_id, date, "folder_name".to_string()),
                None => {
                    let year = year_hint.unwrap_or_else(|| Utc::now().year());
                    let date = NaiveDate::from_ymd_opt(year, 1, 1)
                        .with_context(|| format!("invalid fallback year {year}"))?;
                    warn!(edition = %edition_id, fallback = %date, "no publication date in folder name");
                    warnings.push(format!("{folder}: no publication date found, using {date}"));
                    (edition_id, date, "fallback".to_string())
                }
            }
        }
    };

    let (pages, files) = read_pages(dir)?;
    if pages.is_empty() {
        bail!("no page text found in {}", dir.display());
    }

    let declared = info.as_ref().and_then(|info| info.page_count);
    if let Some(expected) = declared.filter(|expected| *expected != pages.len()) {
        warn!(
            edition = %edition_id,
            expected,
            found = pages.len(),
            "page count differs from edition metadata"
        );
        warnings.push(format!(
            "{edition_id}: info.json declares {expected} pages, found {}",
            pages.len()
        ));
    }

    let sha256 = combined_sha256(&files);

    Ok(EditionSource {
        edition_id,
        directory: dir.to_path_buf(),
        published_at,
        date_source,
        pages,
        files,
        sha256,
        warnings,
    })
}

fn combined_sha256(files: &[PageFileEntry]) -> String {
    let listing = files
        .iter()
        .map(|file| format!("{}:{}\n", file.filename, file.sha256))
        .collect::<String>();
    sha256_text(&listing)
}

fn read_pages(dir: &Path) -> Result<(Vec<SourcePage>, Vec<PageFileEntry>)> {
    let page_pattern =
        Regex::new(r"^page-(\d+)\.txt$").context("failed to compile page filename regex")?;

    let mut numbered = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let Some(filename) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            continue;
        };
        let Some(captures) = page_pattern.captures(&filename) else {
            continue;
        };
        let number = captures[1]
            .parse::<u32>()
            .with_context(|| format!("invalid page number in {filename}"))?;
        numbered.push((number, filename));
    }
    numbered.sort();

    let mut pages = Vec::with_capacity(numbered.len());
    let mut files = Vec::with_capacity(numbered.len());

    if numbered.is_empty() {
        let path = dir.join(SINGLE_TEXT_FILENAME);
        if !path.exists() {
            return Ok((pages, files));
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.push(PageFileEntry {
            filename: SINGLE_TEXT_FILENAME.to_string(),
            sha256: sha256_file(&path)?,
        });
        pages = split_pages(&text)?;
        return Ok((pages, files));
    }

    for (number, filename) in numbered {
        let path = dir.join(&filename);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.push(PageFileEntry {
            filename,
            sha256: sha256_file(&path)?,
        });
        pages.push(SourcePage { number, text });
    }

    Ok((pages, files))
}

/// Splits a whole-edition text dump into pages. Explicit `=== PÁGINA N ===`
/// markers win; otherwise form feeds separate pages numbered from 1.
pub fn split_pages(text: &str) -> Result<Vec<SourcePage>> {
    let marker = Regex::new(r"(?mi)^[ \t]*=+[ \t]*P[ÁA]GINA[ \t]+(\d+)[ \t]*=+[ \t]*$")
        .context("failed to compile page marker regex")?;

    let markers: Vec<(u32, usize, usize)> = marker
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let number = captures.get(1)?.as_str().parse::<u32>().ok()?;
            Some((number, whole.start(), whole.end()))
        })
        .collect();

    if markers.is_empty() {
        return Ok(text
            .split('\u{000C}')
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(index, page)| SourcePage {
                number: index as u32 + 1,
                text: page.to_string(),
            })
            .collect());
    }

    let mut pages = Vec::with_capacity(markers.len());
    for (position, (number, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers
            .get(position + 1)
            .map_or(text.len(), |(_, next_start, _)| *next_start);
        let mut body = text[*body_start..body_end].to_string();
        if position == 0 {
            let preamble = text[..markers[0].1].trim();
            if !preamble.is_empty() {
                body = format!("{preamble}\n{body}");
            }
        }
        pages.push(SourcePage {
            number: *number,
            text: body,
        });
    }
    Ok(pages)
}

/// `R2561-Sep16-18` -> `R2561`. Folders without the prefix keep their name.
pub fn edition_id_from_folder(folder: &str) -> String {
    let digits: String = folder
        .strip_prefix('R')
        .map(|rest| rest.chars().take_while(char::is_ascii_digit).collect())
        .unwrap_or_default();
    if digits.is_empty() {
        folder.to_string()
    } else {
        format!("R{digits}")
    }
}

fn month_number(abbrev: &str) -> Option<u32> {
    let month = match abbrev.to_ascii_lowercase().as_str() {
        "ene" | "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "abr" | "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" | "aug" => 8,
        "sep" | "set" => 9,
        "oct" => 10,
        "nov" => 11,
        "dic" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parses the `-MonDD[-YY]` part of an edition folder name. A two-digit year
/// suffix wins over `year_hint`.
pub fn parse_folder_date(folder: &str, year_hint: Option<i32>) -> Option<NaiveDate> {
    let pattern = Regex::new(r"-([A-Za-z]{3})(\d{1,2})(?:-(\d{2}|\d{4}))?(?:$|[-_ ])").ok()?;
    let captures = pattern.captures(folder)?;

    let month = month_number(&captures[1])?;
    let day = captures[2].parse::<u32>().ok()?;
    let year = match captures.get(3) {
        Some(raw) if raw.as_str().len() == 2 => 2000 + raw.as_str().parse::<i32>().ok()?,
        Some(raw) => raw.as_str().parse::<i32>().ok()?,
        None => year_hint?,
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn folder_date_with_year_suffix() {
        assert_eq!(parse_folder_date("R2561-Sep16-18", None), Some(date(2018, 9, 16)));
        assert_eq!(parse_folder_date("R2600-Dic02-19", Some(2001)), Some(date(2019, 12, 2)));
    }

    #[test]
    fn folder_date_uses_year_hint() {
        assert_eq!(parse_folder_date("R2561-Ago5", Some(2018)), Some(date(2018, 8, 5)));
        assert_eq!(parse_folder_date("R2561-Ago5", None), None);
        assert_eq!(parse_folder_date("R2561-Xyz5", Some(2018)), None);
    }

    #[test]
    fn edition_id_is_numbered_prefix() {
        assert_eq!(edition_id_from_folder("R2561-Sep16-18"), "R2561");
        assert_eq!(edition_id_from_folder("especial-navidad"), "especial-navidad");
    }

    #[test]
    fn split_on_page_markers() {
        let text = "=== PÁGINA 1 ===\nportada\n=== PÁGINA 2 ===\nVENDO CASA\n";
        let pages = split_pages(text).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].number, 2);
        assert!(pages[1].text.contains("VENDO CASA"));
        assert!(!pages[0].text.contains("PÁGINA"));
    }

    #[test]
    fn split_on_form_feeds() {
        let pages = split_pages("uno\u{000C}dos\u{000C}\u{000C}cuatro").unwrap();
        let numbers: Vec<u32> = pages.iter().map(|page| page.number).collect();
        assert_eq!(numbers, vec![1, 2, 4]);
    }

    #[test]
    fn load_edition_from_page_files_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let edition = dir.path().join("R2561-Sep16-18");
        fs::create_dir_all(&edition).unwrap();
        fs::write(edition.join("page-10.txt"), "diez").unwrap();
        fs::write(edition.join("page-2.txt"), "dos").unwrap();
        fs::write(
            edition.join(INFO_FILENAME),
            r#"{"edition_id": "R2561", "published_at": "2018-09-15", "page_count": 3}"#,
        )
        .unwrap();

        let source = load_edition(&edition, None).unwrap();
        assert_eq!(source.edition_id, "R2561");
        assert_eq!(source.published_at, date(2018, 9, 15));
        assert_eq!(source.date_source, "info");
        let numbers: Vec<u32> = source.pages.iter().map(|page| page.number).collect();
        assert_eq!(numbers, vec![2, 10]);
        assert_eq!(source.warnings.len(), 1);
    }

    #[test]
    fn load_edition_falls_back_to_january_first() {
        let dir = tempfile::tempdir().unwrap();
        let edition = dir.path().join("R7");
        fs::create_dir_all(&edition).unwrap();
        fs::write(edition.join(SINGLE_TEXT_FILENAME), "texto").unwrap();

        let source = load_edition(&edition, Some(1999)).unwrap();
        assert_eq!(source.published_at, date(1999, 1, 1));
        assert_eq!(source.date_source, "fallback");
        assert_eq!(source.pages.len(), 1);
    }

    #[test]
    fn source_hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let edition = dir.path().join("R1-Ene3-20");
        fs::create_dir_all(&edition).unwrap();
        fs::write(edition.join("page-1.txt"), "uno").unwrap();
        let before = load_edition(&edition, None).unwrap().sha256;
        fs::write(edition.join("page-1.txt"), "uno modificado").unwrap();
        let after = load_edition(&edition, None).unwrap().sha256;
        assert_ne!(before, after);
    }

    #[test]
    fn empty_edition_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_edition(dir.path(), Some(2018)).is_err());
    }
}
