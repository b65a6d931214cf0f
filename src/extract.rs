//! Document loading: file extension → parser → [`DocumentUnit`]s.
//!
//! | Extension | Parser | Units |
//! |-----------|--------|-------|
//! | `txt` | UTF-8 | one |
//! | `pdf` | `lopdf` page text, falling back to `pdf-extract` | one per page (fallback: one) |
//! | `docx` | `word/document.xml` paragraphs | one |
//! | `xlsx` | worksheet cells, rows as lines | one per sheet |
//! | `jpg`, `jpeg`, `png` | `tesseract` OCR | one |
//!
//! Unsupported extensions are reported as [`LoadOutcome::Unsupported`].
//! Parser failures are returned as [`LoadError`] and never panic; the
//! ingestion loop logs them and moves on to the next file.

use std::io::Read;
use std::path::Path;
use std::process::Command;

use crate::models::DocumentUnit;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
    Docx,
    Xlsx,
    Image,
}

impl FileKind {
    /// Select a parser from the file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "jpg" | "jpeg" | "png" => Some(Self::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(Vec<DocumentUnit>),
    Unsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is not valid UTF-8 text")]
    InvalidUtf8,
    #[error("PDF extraction failed (page parser: {primary}; fallback: {fallback})")]
    Pdf { primary: String, fallback: String },
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// Load `path`, naming the produced units after `file_name`.
pub fn load_file(path: &Path, file_name: &str) -> Result<LoadOutcome, LoadError> {
    let Some(kind) = FileKind::from_file_name(file_name) else {
        return Ok(LoadOutcome::Unsupported);
    };

    let sections: Vec<(Option<String>, String)> = match kind {
        FileKind::Text => {
            let bytes = std::fs::read(path)?;
            let text = String::from_utf8(bytes).map_err(|_| LoadError::InvalidUtf8)?;
            vec![(None, text)]
        }
        FileKind::Pdf => extract_pdf(&std::fs::read(path)?)?,
        FileKind::Docx => vec![(None, extract_docx(&std::fs::read(path)?)?)],
        FileKind::Xlsx => extract_xlsx(&std::fs::read(path)?)?
            .into_iter()
            .map(|(n, text)| (Some(format!("sheet {n}")), text))
            .collect(),
        FileKind::Image => vec![(None, ocr_image(path)?)],
    };

    let units = sections
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(locator, text)| DocumentUnit {
            source: file_name.to_string(),
            locator,
            text,
        })
        .collect();

    Ok(LoadOutcome::Loaded(units))
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<Vec<(Option<String>, String)>, LoadError> {
    match extract_pdf_pages(bytes) {
        Ok(pages) => Ok(pages
            .into_iter()
            .map(|(n, text)| (Some(format!("page {n}")), text))
            .collect()),
        Err(primary) => {
            tracing::debug!("page-level PDF parse failed ({primary}), trying fallback");
            match pdf_extract::extract_text_from_mem(bytes) {
                Ok(text) => Ok(vec![(None, text)]),
                Err(e) => Err(LoadError::Pdf {
                    primary,
                    fallback: e.to_string(),
                }),
            }
        }
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<(u32, String)>, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;
    let mut pages = Vec::new();
    for page_number in doc.get_pages().into_keys() {
        let text = doc
            .extract_text(&[page_number])
            .map_err(|e| format!("page {page_number}: {e}"))?;
        pages.push((page_number, text));
    }
    Ok(pages)
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, LoadError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| LoadError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, LoadError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| LoadError::Ooxml(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| LoadError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(LoadError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Paragraph text of a Word document, one paragraph per line.
fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                in_text = true;
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                paragraph.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = paragraph.trim_end();
                    if !line.is_empty() {
                        out.push_str(line);
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !paragraph.trim().is_empty() {
        out.push_str(paragraph.trim_end());
    }
    Ok(out)
}

/// Worksheet text as `(sheet number, text)`; rows become lines and cells
/// are tab-separated.
fn extract_xlsx(bytes: &[u8]) -> Result<Vec<(usize, String)>, LoadError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };

    let sheet_names = list_worksheet_names(&archive);
    let mut sheets = Vec::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        sheets.push((idx + 1, extract_sheet_rows(&sheet_xml, &shared_strings)?));
    }
    Ok(sheets)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, LoadError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    Inline,
    Literal,
}

fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, LoadError> {
    let mut lines: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type = CellType::Literal;
    let mut cell_value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_value.clear();
                    cell_type = CellType::Literal;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_type = match attr.value.as_ref() {
                                b"s" => CellType::Shared,
                                b"inlineStr" => CellType::Inline,
                                _ => CellType::Literal,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if cell_type == CellType::Inline => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                cell_value.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let raw = cell_value.trim();
                    let text = match cell_type {
                        CellType::Shared => raw
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        CellType::Inline | CellType::Literal => raw.to_string(),
                    };
                    if !text.is_empty() {
                        row.push(text);
                        cell_count += 1;
                    }
                }
                b"row" => {
                    if !row.is_empty() {
                        lines.push(row.join("\t"));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        lines.push(row.join("\t"));
    }
    Ok(lines.join("\n"))
}

// ============ Images ============

/// OCR an image with the `tesseract` executable.
fn ocr_image(path: &Path) -> Result<String, LoadError> {
    tracing::debug!("running OCR on {}", path.display());

    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .args(["--oem", "3"])
        .args(["--psm", "1"])
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                LoadError::Ocr("tesseract executable not found on PATH".to_string())
            }
            _ => LoadError::Ocr(e.to_string()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Tesseract reports warnings on stderr while still producing text.
        if output.stdout.is_empty() {
            return Err(LoadError::Ocr(stderr.trim().to_string()));
        }
        tracing::debug!("tesseract warning: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn write(tmp: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = tmp.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn loaded(outcome: LoadOutcome) -> Vec<DocumentUnit> {
        match outcome {
            LoadOutcome::Loaded(units) => units,
            LoadOutcome::Unsupported => panic!("expected a supported file"),
        }
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(FileKind::from_file_name("a.TXT"), Some(FileKind::Text));
        assert_eq!(FileKind::from_file_name("scan.JpEg"), Some(FileKind::Image));
        assert_eq!(FileKind::from_file_name("deck.pptx"), None);
        assert_eq!(FileKind::from_file_name("README"), None);
    }

    #[test]
    fn unsupported_extension_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "notes.md", b"# hi");
        assert_eq!(load_file(&path, "notes.md").unwrap(), LoadOutcome::Unsupported);
    }

    #[test]
    fn text_file_single_unit() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "a.txt", "Office hours are 9 to 5.".as_bytes());
        let units = loaded(load_file(&path, "a.txt").unwrap());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].source, "a.txt");
        assert_eq!(units[0].locator, None);
        assert_eq!(units[0].text, "Office hours are 9 to 5.");
    }

    #[test]
    fn empty_text_file_yields_no_units() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "blank.txt", b"   \n");
        assert!(loaded(load_file(&path, "blank.txt").unwrap()).is_empty());
    }

    #[test]
    fn invalid_utf8_text_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "bad.txt", &[0xff, 0xfe, 0x00, 0xc3]);
        assert!(matches!(
            load_file(&path, "bad.txt"),
            Err(LoadError::InvalidUtf8)
        ));
    }

    #[test]
    fn invalid_pdf_reports_both_parsers() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "bad.pdf", b"not a pdf");
        let err = load_file(&path, "bad.pdf").unwrap_err();
        assert!(matches!(err, LoadError::Pdf { .. }));
        assert!(err.to_string().contains("fallback"));
    }

    #[test]
    fn pdf_pages_become_units() {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("Refunds take ten days")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "policy.PDF", &bytes);
        let units = loaded(load_file(&path, "policy.PDF").unwrap());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].locator.as_deref(), Some("page 1"));
        assert!(units[0].text.contains("Refunds take ten days"));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t xml:space="preserve">Admission </w:t></w:r><w:r><w:t>opens in June</w:t></w:r></w:p><w:p><w:r><w:t>Fees &amp; charges</w:t></w:r></w:p></w:body></w:document>"#;
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "guide.docx", &zip_with(&[("word/document.xml", xml)]));
        let units = loaded(load_file(&path, "guide.docx").unwrap());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Admission opens in June\nFees & charges\n");
    }

    #[test]
    fn docx_without_document_xml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "odd.docx", &zip_with(&[("other.xml", "<a/>")]));
        assert!(matches!(
            load_file(&path, "odd.docx"),
            Err(LoadError::Ooxml(_))
        ));
    }

    #[test]
    fn invalid_zip_is_ooxml_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "bad.xlsx", b"not a zip");
        assert!(matches!(
            load_file(&path, "bad.xlsx"),
            Err(LoadError::Ooxml(_))
        ));
    }

    #[test]
    fn xlsx_sheets_become_units() {
        let shared = r#"<sst><si><t>Course</t></si><si><t>Fee</t></si><si><r><t>B.</t></r><r><t>Tech</t></r></si></sst>"#;
        let sheet1 = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>150000</v></c></row>
        </sheetData></worksheet>"#;
        let sheet2 = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>Hostel</t></is></c><c r="B1"/></row>
        </sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet2.xml", sheet2),
            ("xl/worksheets/sheet1.xml", sheet1),
        ]);

        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "fees.xlsx", &bytes);
        let units = loaded(load_file(&path, "fees.xlsx").unwrap());
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].locator.as_deref(), Some("sheet 1"));
        assert_eq!(units[0].text, "Course\tFee\nB.Tech\t150000");
        assert_eq!(units[1].locator.as_deref(), Some("sheet 2"));
        assert_eq!(units[1].text, "Hostel");
    }
}
