//! Plausibility audit for OCR derivatives.
//!
//! A page directory passes when its `OCR.txt` contains at least one common
//! English word. `HOCR.html` is checked too, but problems with it are only
//! logged. The audit runs as an ordinary stage over page directories, so the
//! engine's ratio threshold decides whether too many pages lack text.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::batch::{escape_braces, TemplateMode};
use crate::config::{AcceptabilityConfig, OnUnacceptable, StageConfig};
use crate::discovery::ItemKind;

pub const OCR_FILENAME: &str = "OCR.txt";
pub const HOCR_FILENAME: &str = "HOCR.html";

/// Fraction of textless pages above which the audit fails.
pub const DEFAULT_TEXTLESS_THRESHOLD: f64 = 0.10;

/// Name of the audit stage.
pub const AUDIT_STAGE: &str = "ocr-check";

const COMMON_ENGLISH_WORDS: &[&str] = &[
    "the", "of", "and", "to", "in", "is", "was", "for", "that", "with", "on", "as", "by", "at",
    "from", "his", "her", "this", "which", "are", "be", "it", "not", "have", "has", "were", "but",
    "or", "an", "they", "you", "we", "will", "their", "one", "all", "been", "who", "he", "she",
];

/// State of a page's plain-text OCR output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum OcrStatus {
    HasText,
    Textless,
    Unreadable(String),
}

/// State of a page's hOCR output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum HocrStatus {
    Valid,
    NotHtml,
    Unreadable(String),
}

/// Result of checking one page directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCheck {
    pub page: PathBuf,
    pub ocr: OcrStatus,
    pub hocr: HocrStatus,
}

impl PageCheck {
    /// A page counts against the audit when its OCR text is missing or
    /// unrecognizable.
    pub fn is_textless(&self) -> bool {
        self.ocr != OcrStatus::HasText
    }
}

/// Whether `text` contains a common English word, ignoring case.
pub fn contains_common_english_word(text: &str) -> bool {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .any(|word| {
            COMMON_ENGLISH_WORDS
                .iter()
                .any(|common| word.eq_ignore_ascii_case(common))
        })
}

fn read_lossy(path: &Path) -> Result<String, String> {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| format!("{}: {}", path.display(), e))
}

/// Checks the OCR derivatives in one page directory, logging any problem.
pub fn check_page(dir: &Path) -> PageCheck {
    let ocr_path = dir.join(OCR_FILENAME);
    let ocr = match read_lossy(&ocr_path) {
        Ok(text) if contains_common_english_word(&text) => OcrStatus::HasText,
        Ok(_) => {
            tracing::warn!(
                "Page OCR output doesn't contain any common English words {:?}",
                ocr_path
            );
            OcrStatus::Textless
        }
        Err(e) => {
            tracing::error!("OCR text not readable: {}", e);
            OcrStatus::Unreadable(e)
        }
    };

    let hocr_path = dir.join(HOCR_FILENAME);
    let hocr = match read_lossy(&hocr_path) {
        Ok(text) if text.to_ascii_lowercase().contains("html") => HocrStatus::Valid,
        Ok(_) => {
            tracing::error!("Page HOCR output doesn't contain 'html' {:?}", hocr_path);
            HocrStatus::NotHtml
        }
        Err(e) => {
            tracing::error!("HOCR not readable: {}", e);
            HocrStatus::Unreadable(e)
        }
    };

    PageCheck {
        page: dir.to_path_buf(),
        ocr,
        hocr,
    }
}

/// Builds the audit stage: `<program> check-page {itemPath}` over page
/// directories, failing when more than 10% of pages lack text.
///
/// Items are the page directories themselves, so the page is `{itemPath}`;
/// `{itemDir}` would name the issue directory above it.
pub fn audit_stage(program: &str) -> StageConfig {
    let program = escape_braces(&shell_words::quote(program));
    StageConfig {
        mode: TemplateMode::Direct,
        items: ItemKind::Dirs,
        acceptability: AcceptabilityConfig::MaxFailureRatio {
            threshold: DEFAULT_TEXTLESS_THRESHOLD,
        },
        on_unacceptable: OnUnacceptable::Halt,
        ..StageConfig::new(AUDIT_STAGE, format!("{program} check-page {{itemPath}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{ConcurrencyLimit, PathResolver, VariableResolver};
    use crate::config::EngineConfig;
    use std::fs;

    fn page(ocr: Option<&str>, hocr: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        if let Some(text) = ocr {
            fs::write(dir.path().join(OCR_FILENAME), text).unwrap();
        }
        if let Some(text) = hocr {
            fs::write(dir.path().join(HOCR_FILENAME), text).unwrap();
        }
        dir
    }

    #[test]
    fn test_common_words_are_found_case_insensitively() {
        assert!(contains_common_english_word("THE Y-TEEN SCENE"));
        assert!(contains_common_english_word("news,and notes"));
        assert!(!contains_common_english_word("~~ |||| ;;; 1923 xqzt"));
        assert!(!contains_common_english_word(""));
    }

    #[test]
    fn test_words_must_match_whole() {
        assert!(!contains_common_english_word("thermometer andante"));
    }

    #[test]
    fn test_page_with_text_passes() {
        let dir = page(
            Some("Meeting of the club was held"),
            Some("<html><body class='ocr_page'></body></html>"),
        );
        let check = check_page(dir.path());
        assert_eq!(check.ocr, OcrStatus::HasText);
        assert_eq!(check.hocr, HocrStatus::Valid);
        assert!(!check.is_textless());
    }

    #[test]
    fn test_garbage_ocr_is_textless() {
        let dir = page(Some("~~~ ||| ;;"), Some("<HTML></HTML>"));
        let check = check_page(dir.path());
        assert_eq!(check.ocr, OcrStatus::Textless);
        assert!(check.is_textless());
    }

    #[test]
    fn test_missing_files() {
        let dir = page(None, None);
        let check = check_page(dir.path());
        assert!(matches!(check.ocr, OcrStatus::Unreadable(_)));
        assert!(matches!(check.hocr, HocrStatus::Unreadable(_)));
        assert!(check.is_textless());
    }

    #[test]
    fn test_bad_hocr_does_not_make_page_textless() {
        let dir = page(Some("the end"), Some("plain text"));
        let check = check_page(dir.path());
        assert_eq!(check.hocr, HocrStatus::NotHtml);
        assert!(!check.is_textless());
    }

    #[test]
    fn test_audit_stage_template_quotes_program() {
        let stage = audit_stage("/opt/page batch/bin/pagebatch");
        assert_eq!(stage.items, ItemKind::Dirs);

        let engine = EngineConfig {
            concurrency: None,
            ..Default::default()
        };
        let mut stage = stage;
        stage.concurrency = Some(1);
        let spec = stage.to_spec(&engine).unwrap();
        assert_eq!(spec.concurrency, ConcurrencyLimit::new(1).unwrap());

        let vars = PathResolver.resolve("batch/page 1").unwrap();
        let cmd = spec.template.expand(&vars).unwrap();
        assert_eq!(cmd.program, "/opt/page batch/bin/pagebatch");
        assert_eq!(cmd.args, vec!["check-page", "batch/page 1"]);
    }
}
