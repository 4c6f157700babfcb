use crate::error::{Error, Result};

/// MIME types accepted for image attachments.
pub const SUPPORTED_IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
];

/// MIME types accepted for document attachments and RAG uploads.
pub const SUPPORTED_DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/csv",
    "text/markdown",
    "application/json",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// File extensions the extractor understands.
pub const SUPPORTED_RAG_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "csv", "json", "docx", "xlsx"];

/// Strip a client-supplied filename down to a safe basename.
///
/// Path separators and parent references are removed; anything left empty
/// becomes "file".
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Lowercase extension of a filename, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    let ext = name.rsplit('.').next()?;
    if ext == name {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Guess a MIME type from a filename extension.
pub fn mime_from_extension(name: &str) -> &'static str {
    match file_extension(name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Validate an attachment upload's MIME type and size against the
/// configured limits.
pub fn validate_attachment_upload(
    mime_type: &str,
    size: u64,
    max_image_bytes: u64,
    max_document_bytes: u64,
) -> Result<()> {
    if SUPPORTED_IMAGE_MIMES.contains(&mime_type) {
        if size > max_image_bytes {
            return Err(Error::Validation(format!(
                "Image exceeds maximum size of {} bytes",
                max_image_bytes
            )));
        }
        return Ok(());
    }
    if SUPPORTED_DOCUMENT_MIMES.contains(&mime_type) {
        if size > max_document_bytes {
            return Err(Error::Validation(format!(
                "Document exceeds maximum size of {} bytes",
                max_document_bytes
            )));
        }
        return Ok(());
    }
    Err(Error::Validation(format!(
        "Unsupported file type: {}",
        mime_type
    )))
}

/// Validate a RAG document upload by extension.
pub fn validate_rag_extension(filename: &str) -> Result<String> {
    let ext = file_extension(filename)
        .ok_or_else(|| Error::Validation("Filename has no extension".to_string()))?;
    if !SUPPORTED_RAG_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::Validation(format!(
            "Unsupported file type. Supported: {}",
            SUPPORTED_RAG_EXTENSIONS.join(", ")
        )));
    }
    Ok(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("c:\\temp\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
    }

    #[test]
    fn test_sanitize_empty_becomes_file() {
        assert_eq!(sanitize_filename("...."), "file");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn test_extension_lowercased() {
        assert_eq!(file_extension("Report.PDF").as_deref(), Some("pdf"));
        assert_eq!(file_extension("no_extension"), None);
    }

    #[test]
    fn test_unsupported_mime_rejected() {
        let err = validate_attachment_upload("application/x-msdownload", 10, 100, 100);
        assert!(err.is_err());
    }

    #[test]
    fn test_image_size_limit() {
        assert!(validate_attachment_upload("image/png", 99, 100, 200).is_ok());
        assert!(validate_attachment_upload("image/png", 101, 100, 200).is_err());
    }

    #[test]
    fn test_document_size_limit() {
        assert!(validate_attachment_upload("application/pdf", 150, 100, 200).is_ok());
        assert!(validate_attachment_upload("application/pdf", 201, 100, 200).is_err());
    }

    #[test]
    fn test_rag_extension_check() {
        assert_eq!(validate_rag_extension("notes.md").unwrap(), "md");
        assert!(validate_rag_extension("binary.exe").is_err());
        assert!(validate_rag_extension("no_extension").is_err());
    }
}
