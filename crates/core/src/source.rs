use crate::error::SourceError;
use crate::models::{BookFingerprint, ParagraphRecord, PipelineOptions};
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Parsed book plus the ordered paragraph stream extracted from it.
pub struct BookRecords {
    pub fingerprint: BookFingerprint,
    pub records: Vec<ParagraphRecord>,
}

#[derive(Debug)]
pub struct SkippedBook {
    pub path: PathBuf,
    pub reason: String,
}

pub fn discover_book_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_book = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("txt")
            });

        if is_book {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, SourceError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Loads one book file and flattens it into ordered paragraph records.
/// Paragraphs below the minimum length are filtered here, before the
/// pipeline ever sees them.
pub fn load_book_records(
    path: &Path,
    options: &PipelineOptions,
) -> Result<BookRecords, SourceError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let book = match extension.as_str() {
        "json" => parse_json_book(path)?,
        "txt" => parse_plaintext_book(path)?,
        other => {
            return Err(SourceError::MalformedBook(format!(
                "unsupported book format `{other}`: {}",
                path.display()
            )))
        }
    };

    let checksum = digest_file(path)?;
    let document_id = book
        .book_uuid
        .clone()
        .unwrap_or_else(|| stable_document_id(path));
    let title = book
        .book_title
        .clone()
        .unwrap_or_else(|| "Unknown Title".to_string());
    let author = book
        .book_author
        .clone()
        .unwrap_or_else(|| "Unknown Author".to_string());

    let fingerprint = BookFingerprint {
        document_id: document_id.clone(),
        title: title.clone(),
        author: author.clone(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
        ingested_at: Utc::now(),
    };

    let mut records = Vec::new();
    let mut seen_keys = HashSet::new();

    for (chapter_position, chapter) in book.chapters.iter().enumerate() {
        let chapter_index = chapter
            .chapter_number
            .unwrap_or(chapter_position as u32 + 1);
        let chapter_title = chapter
            .chapter_title
            .clone()
            .unwrap_or_else(|| format!("Section {chapter_index}"));

        let mut kept_in_chapter = 0u32;
        for paragraph in &chapter.paragraphs {
            let text = normalize_whitespace(&paragraph.text);
            if text.chars().count() <= options.min_paragraph_chars {
                continue;
            }

            kept_in_chapter += 1;
            let paragraph_index = paragraph.paragraph_number.unwrap_or(kept_in_chapter);

            if !seen_keys.insert((chapter_index, paragraph_index)) {
                return Err(SourceError::MalformedBook(format!(
                    "duplicate paragraph position {chapter_index}:{paragraph_index} in {}",
                    path.display()
                )));
            }

            let mut metadata = BTreeMap::new();
            metadata.insert("book_title".to_string(), json!(title));
            metadata.insert("book_author".to_string(), json!(author));
            metadata.insert("book_uuid".to_string(), json!(document_id));
            metadata.insert("chapter_number".to_string(), json!(chapter_index));
            metadata.insert("chapter_title".to_string(), json!(chapter_title));
            metadata.insert("paragraph_number".to_string(), json!(paragraph_index));
            metadata.insert("paragraph_text".to_string(), json!(text));

            records.push(ParagraphRecord {
                document_id: document_id.clone(),
                chapter_index,
                chapter_title: chapter_title.clone(),
                paragraph_index,
                text,
                metadata,
            });
        }
    }

    if records.is_empty() {
        return Err(SourceError::EmptyBook(path.display().to_string()));
    }

    Ok(BookRecords {
        fingerprint,
        records,
    })
}

#[derive(Debug, Deserialize)]
struct BookFile {
    #[serde(default)]
    book_uuid: Option<String>,
    #[serde(default)]
    book_title: Option<String>,
    #[serde(default)]
    book_author: Option<String>,
    #[serde(default)]
    chapters: Vec<ChapterFile>,
}

#[derive(Debug, Deserialize)]
struct ChapterFile {
    #[serde(default)]
    chapter_number: Option<u32>,
    #[serde(default)]
    chapter_title: Option<String>,
    #[serde(default)]
    paragraphs: Vec<ParagraphFile>,
}

#[derive(Debug, Deserialize)]
struct ParagraphFile {
    text: String,
    #[serde(default)]
    paragraph_number: Option<u32>,
}

fn parse_json_book(path: &Path) -> Result<BookFile, SourceError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|error| SourceError::MalformedBook(format!("{}: {error}", path.display())))
}

/// Plain-text fallback: a whole file is one section, paragraphs are split on
/// blank lines.
fn parse_plaintext_book(path: &Path) -> Result<BookFile, SourceError> {
    let raw = fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| SourceError::MissingFileName(path.display().to_string()))?
        .to_string();

    let splitter = Regex::new(r"(?:\r?\n){2,}")?;
    let paragraphs = splitter
        .split(&raw)
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| ParagraphFile {
            text: block.to_string(),
            paragraph_number: None,
        })
        .collect();

    Ok(BookFile {
        book_uuid: None,
        book_title: Some(stem.clone()),
        book_author: None,
        chapters: vec![ChapterFile {
            chapter_number: Some(1),
            chapter_title: Some(stem),
            paragraphs,
        }],
    })
}

fn stable_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}
