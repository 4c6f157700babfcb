//! Text extraction from uploaded documents.
//!
//! Pure aside from reading the file: every failure is reported through the
//! `error` field of the result, never by panicking or returning `Err`, so
//! the ingestion pipeline can persist the message on the document row.

use regex::Regex;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub text: String,
    /// Per-page text for paged formats (PDF pages, XLSX sheets).
    pub pages: Vec<String>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}

impl ExtractResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            metadata: json!({}),
            ..Default::default()
        }
    }
}

/// Extract text from a document on disk.
///
/// `file_type` is the lowercase extension tag stored on the document row.
pub fn extract(path: &Path, file_type: &str) -> ExtractResult {
    let file_type = file_type.trim_start_matches('.').to_ascii_lowercase();

    if !crate::validation::SUPPORTED_RAG_EXTENSIONS.contains(&file_type.as_str()) {
        return ExtractResult::failed(format!("Unsupported file type: {}", file_type));
    }

    if !path.exists() {
        return ExtractResult::failed(format!("File not found: {}", path.display()));
    }

    let mut result = match file_type.as_str() {
        "pdf" => extract_pdf(path),
        "docx" => extract_docx(path),
        "xlsx" => extract_xlsx(path),
        "txt" | "md" | "csv" | "json" => extract_text_file(path),
        other => ExtractResult::failed(format!("Extractor not implemented for: {}", other)),
    };

    if result.error.is_none() && result.text.trim().is_empty() {
        result.error = Some("no text content".to_string());
    }

    result
}

fn extract_pdf(path: &Path) -> ExtractResult {
    match pdf_extract::extract_text_by_pages(path) {
        Ok(pages) => {
            let text = pages.join("\n\n");
            let metadata = json!({ "page_count": pages.len() });
            ExtractResult {
                text,
                pages,
                metadata,
                error: None,
            }
        }
        Err(e) => ExtractResult::failed(format!("PDF extraction failed: {}", e)),
    }
}

/// Reads one XML part out of a ZIP container into a string.
fn read_zip_entry(path: &Path, entry: &str) -> Result<String, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("open failed: {}", e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| format!("not a zip file: {}", e))?;
    let mut part = archive
        .by_name(entry)
        .map_err(|e| format!("missing {}: {}", entry, e))?;
    let mut content = String::new();
    part.read_to_string(&mut content)
        .map_err(|e| format!("read failed: {}", e))?;
    Ok(content)
}

fn xml_tag_value(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!("<{tag}[^>]*>([^<]*)</{tag}>");
    Regex::new(&pattern)
        .ok()?
        .captures(xml)
        .map(|c| unescape_xml(&c[1]))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Concatenated text runs (`<w:t>` / `<t>`) inside an XML fragment.
fn text_runs(fragment: &str, run_pattern: &Regex) -> String {
    let mut out = String::new();
    for caps in run_pattern.captures_iter(fragment) {
        out.push_str(&unescape_xml(&caps[1]));
    }
    out
}

fn extract_docx(path: &Path) -> ExtractResult {
    static TABLE: OnceLock<Regex> = OnceLock::new();
    static ROW: OnceLock<Regex> = OnceLock::new();
    static CELL: OnceLock<Regex> = OnceLock::new();
    static RUN: OnceLock<Regex> = OnceLock::new();

    let table = TABLE.get_or_init(|| Regex::new(r"(?s)<w:tbl>.*?</w:tbl>").expect("docx pattern"));
    let row = ROW.get_or_init(|| Regex::new(r"(?s)<w:tr[ >].*?</w:tr>").expect("docx pattern"));
    let cell = CELL.get_or_init(|| Regex::new(r"(?s)<w:tc[ >].*?</w:tc>").expect("docx pattern"));
    let run = RUN.get_or_init(|| Regex::new(r"(?s)<w:t[^>]*>([^<]*)</w:t>").expect("docx pattern"));

    let document = match read_zip_entry(path, "word/document.xml") {
        Ok(xml) => xml,
        Err(e) => return ExtractResult::failed(format!("DOCX extraction failed: {}", e)),
    };

    let mut blocks: Vec<String> = Vec::new();

    // Paragraph text outside tables, in document order. Splitting on the
    // paragraph close tag keeps each paragraph's runs together without
    // tripping over self-closing property tags inside it.
    let body_without_tables = table.replace_all(&document, "");
    for segment in body_without_tables.split("</w:p>") {
        let text = text_runs(segment, run);
        if !text.trim().is_empty() {
            blocks.push(text.trim().to_string());
        }
    }

    // Tables: rows joined cell-by-cell with " | ".
    for tbl in table.find_iter(&document) {
        let mut rows: Vec<String> = Vec::new();
        for tr in row.find_iter(tbl.as_str()) {
            let cells: Vec<String> = cell
                .find_iter(tr.as_str())
                .map(|tc| text_runs(tc.as_str(), run).trim().to_string())
                .collect();
            if cells.iter().any(|c| !c.is_empty()) {
                rows.push(cells.join(" | "));
            }
        }
        if !rows.is_empty() {
            blocks.push(rows.join("\n"));
        }
    }

    // Core properties are optional; missing parts just leave metadata empty.
    let metadata = match read_zip_entry(path, "docProps/core.xml") {
        Ok(core) => json!({
            "title": xml_tag_value(&core, "dc:title").unwrap_or_default(),
            "author": xml_tag_value(&core, "dc:creator").unwrap_or_default(),
            "subject": xml_tag_value(&core, "dc:subject").unwrap_or_default(),
            "created": xml_tag_value(&core, "dcterms:created").unwrap_or_default(),
            "modified": xml_tag_value(&core, "dcterms:modified").unwrap_or_default(),
        }),
        Err(_) => json!({}),
    };

    ExtractResult {
        text: blocks.join("\n\n"),
        pages: Vec::new(),
        metadata,
        error: None,
    }
}

fn extract_xlsx(path: &Path) -> ExtractResult {
    static SHARED: OnceLock<Regex> = OnceLock::new();
    static SHEET_NAME: OnceLock<Regex> = OnceLock::new();
    static ROW: OnceLock<Regex> = OnceLock::new();
    static CELL: OnceLock<Regex> = OnceLock::new();
    static VALUE: OnceLock<Regex> = OnceLock::new();
    static RUN: OnceLock<Regex> = OnceLock::new();

    let shared =
        SHARED.get_or_init(|| Regex::new(r"(?s)<si>(.*?)</si>").expect("xlsx pattern"));
    let sheet_name = SHEET_NAME
        .get_or_init(|| Regex::new(r#"<sheet [^>]*name="([^"]*)""#).expect("xlsx pattern"));
    let row = ROW.get_or_init(|| Regex::new(r"(?s)<row[ >].*?</row>").expect("xlsx pattern"));
    let cell = CELL.get_or_init(|| {
        Regex::new(r#"(?s)<c( [^>]*)?(?:/>|>(.*?)</c>)"#).expect("xlsx pattern")
    });
    let value = VALUE.get_or_init(|| Regex::new(r"(?s)<v>([^<]*)</v>").expect("xlsx pattern"));
    let run = RUN.get_or_init(|| Regex::new(r"(?s)<t[^>]*>([^<]*)</t>").expect("xlsx pattern"));

    // Shared strings table; absent in workbooks with only numeric cells.
    let shared_strings: Vec<String> = match read_zip_entry(path, "xl/sharedStrings.xml") {
        Ok(xml) => shared
            .captures_iter(&xml)
            .map(|c| text_runs(&c[1], run))
            .collect(),
        Err(_) => Vec::new(),
    };

    let sheet_names: Vec<String> = match read_zip_entry(path, "xl/workbook.xml") {
        Ok(xml) => sheet_name
            .captures_iter(&xml)
            .map(|c| unescape_xml(&c[1]))
            .collect(),
        Err(e) => return ExtractResult::failed(format!("XLSX extraction failed: {}", e)),
    };

    let mut pages: Vec<String> = Vec::new();

    for (idx, name) in sheet_names.iter().enumerate() {
        let entry = format!("xl/worksheets/sheet{}.xml", idx + 1);
        let sheet_xml = match read_zip_entry(path, &entry) {
            Ok(xml) => xml,
            Err(_) => continue,
        };

        let mut rows: Vec<String> = Vec::new();
        for r in row.find_iter(&sheet_xml) {
            let mut cells: Vec<String> = Vec::new();
            for c in cell.captures_iter(r.as_str()) {
                let attrs = c.get(1).map(|m| m.as_str()).unwrap_or("");
                let body = c.get(2).map(|m| m.as_str()).unwrap_or("");
                let raw = value
                    .captures(body)
                    .map(|v| unescape_xml(&v[1]))
                    .unwrap_or_else(|| text_runs(body, run));
                let resolved = if attrs.contains(r#"t="s""#) {
                    raw.parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    raw
                };
                cells.push(resolved);
            }
            if cells.iter().any(|v| !v.trim().is_empty()) {
                rows.push(cells.join(" | "));
            }
        }

        let mut sheet_content = vec![format!("## Sheet: {}\n", name)];
        if !rows.is_empty() {
            // Rule row after the assumed header row.
            if rows.len() > 1 {
                let width = rows[0].split(" | ").count();
                rows.insert(1, vec!["---"; width].join(" | "));
            }
            sheet_content.extend(rows);
        }
        pages.push(sheet_content.join("\n"));
    }

    let metadata = json!({
        "sheet_count": sheet_names.len(),
        "sheet_names": sheet_names,
    });

    ExtractResult {
        text: pages.join("\n\n"),
        pages,
        metadata,
        error: None,
    }
}

/// Plain-text formats: decode with the first encoding that succeeds.
fn extract_text_file(path: &Path) -> ExtractResult {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return ExtractResult::failed(format!("Text extraction failed: {}", e)),
    };

    let (text, used_encoding) = decode_text(&bytes);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let metadata = json!({
        "encoding": used_encoding,
        "file_type": ext,
        "char_count": text.chars().count(),
        "line_count": text.matches('\n').count() + 1,
    });

    ExtractResult {
        text,
        pages: Vec::new(),
        metadata,
        error: None,
    }
}

/// utf-8 strict, then latin-1 (which accepts any byte sequence). A
/// leading BOM is valid utf-8 and is kept as-is, so plain utf-8 always
/// wins for BOM-prefixed files too.
pub(crate) fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "utf-8");
    }

    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    (decoded.into_owned(), "latin-1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_unsupported_type() {
        let result = extract(Path::new("/tmp/whatever.bin"), "bin");
        assert!(result.error.as_deref().unwrap().contains("Unsupported"));
    }

    #[test]
    fn test_missing_file() {
        let result = extract(Path::new("/tmp/definitely-not-here.txt"), "txt");
        assert!(result.error.as_deref().unwrap().contains("File not found"));
    }

    #[test]
    fn test_plain_text_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "line one\nline two\n").unwrap();

        let result = extract(&path, "txt");
        assert!(result.error.is_none());
        assert_eq!(result.text, "line one\nline two\n");
        assert_eq!(result.metadata["encoding"], "utf-8");
        assert_eq!(result.metadata["line_count"], 3);
        assert!(result.pages.is_empty());
    }

    #[test]
    fn test_utf8_bom_kept_and_decoded_as_plain_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"\xEF\xBB\xBFhello").unwrap();
        drop(f);

        let result = extract(&path, "txt");
        assert!(result.error.is_none());
        assert_eq!(result.text, "\u{feff}hello");
        assert_eq!(result.metadata["encoding"], "utf-8");
    }

    #[test]
    fn test_latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.txt");
        // 0xE9 is 'é' in latin-1/windows-1252 but invalid as lone UTF-8.
        std::fs::write(&path, [b'c', b'a', b'f', 0xE9]).unwrap();

        let result = extract(&path, "txt");
        assert!(result.error.is_none());
        assert_eq!(result.text, "café");
        assert_eq!(result.metadata["encoding"], "latin-1");
    }

    #[test]
    fn test_empty_file_reports_no_text_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n ").unwrap();

        let result = extract(&path, "txt");
        assert_eq!(result.error.as_deref(), Some("no text content"));
    }

    fn write_minimal_docx(path: &Path, body: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        archive.start_file("word/document.xml", options).unwrap();
        archive.write_all(body.as_bytes()).unwrap();
        archive.finish().unwrap();
    }

    #[test]
    fn test_docx_paragraphs_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.docx");
        let body = concat!(
            r#"<?xml version="1.0"?><w:document><w:body>"#,
            r#"<w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tr ><w:tc ><w:p><w:r><w:t>A1</w:t></w:r></w:p></w:tc>"#,
            r#"<w:tc ><w:p><w:r><w:t>B1</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
            r#"</w:body></w:document>"#,
        );
        write_minimal_docx(&path, body);

        let result = extract(&path, "docx");
        assert!(result.error.is_none(), "{:?}", result.error);
        assert!(result.text.contains("First paragraph."));
        assert!(result.text.contains("Second paragraph."));
        assert!(result.text.contains("A1 | B1"));
        assert!(result.pages.is_empty());
    }

    fn write_minimal_xlsx(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        let options = || zip::write::SimpleFileOptions::default();

        archive.start_file("xl/workbook.xml", options()).unwrap();
        archive
            .write_all(br#"<workbook><sheets><sheet name="Data" sheetId="1"/></sheets></workbook>"#)
            .unwrap();

        archive.start_file("xl/sharedStrings.xml", options()).unwrap();
        archive
            .write_all(b"<sst><si><t>name</t></si><si><t>alice</t></si></sst>")
            .unwrap();

        archive
            .start_file("xl/worksheets/sheet1.xml", options())
            .unwrap();
        archive
            .write_all(
                concat!(
                    r#"<worksheet><sheetData>"#,
                    r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>42</v></c></row>"#,
                    r#"<row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>7</v></c></row>"#,
                    r#"</sheetData></worksheet>"#,
                )
                .as_bytes(),
            )
            .unwrap();

        archive.finish().unwrap();
    }

    #[test]
    fn test_xlsx_sheets_as_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        write_minimal_xlsx(&path);

        let result = extract(&path, "xlsx");
        assert!(result.error.is_none(), "{:?}", result.error);
        assert_eq!(result.pages.len(), 1);
        assert!(result.text.contains("## Sheet: Data"));
        assert!(result.text.contains("name | 42"));
        assert!(result.text.contains("--- | ---"));
        assert!(result.text.contains("alice | 7"));
        assert_eq!(result.metadata["sheet_count"], 1);
    }
}
