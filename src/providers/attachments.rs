//! Attachment loading for provider requests.
//!
//! Each stored attachment resolves to one tagged part: images inline as
//! base64, text-like documents as their content, office formats through
//! the extractor, and PDFs as raw bytes for providers that take them
//! natively. Unreadable attachments are skipped with a warning rather
//! than failing the turn.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::{Path, PathBuf};

use crate::models::requests::AttachmentMeta;
use crate::services::extractor;

const TEXT_LIKE_MIMES: &[&str] = &["text/plain", "text/csv", "text/markdown", "application/json"];

const EXTRACTABLE_MIMES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

#[derive(Debug, Clone)]
pub enum AttachmentPart {
    Image {
        mime_type: String,
        base64: String,
        filename: String,
    },
    TextDocument {
        filename: String,
        content: String,
    },
    /// Original bytes for providers with native PDF support.
    NativePdf {
        filename: String,
        base64: String,
    },
}

impl AttachmentPart {
    /// Text rendering of a document part, appended to message text for
    /// providers without a document slot.
    pub fn formatted_text(filename: &str, content: &str) -> String {
        format!("\n\n[File: {}]\n{}", filename, content)
    }
}

/// Load attachments into provider-ready parts.
///
/// `native_pdf` keeps PDF bytes intact instead of extracting them to text.
pub async fn resolve_parts(
    upload_root: &Path,
    metas: &[AttachmentMeta],
    native_pdf: bool,
) -> Vec<AttachmentPart> {
    let mut parts = Vec::new();

    for meta in metas {
        match resolve_one(upload_root, meta, native_pdf).await {
            Some(part) => parts.push(part),
            None => {
                tracing::warn!(
                    "[Attachments] Skipping unreadable attachment {}",
                    meta.original_filename
                );
            }
        }
    }

    parts
}

async fn resolve_one(
    upload_root: &Path,
    meta: &AttachmentMeta,
    native_pdf: bool,
) -> Option<AttachmentPart> {
    let path: PathBuf = upload_root.join(meta.file_path.trim_start_matches('/'));
    if !path.exists() {
        tracing::error!("[Attachments] File not found: {}", path.display());
        return None;
    }

    if meta.file_type == "image" {
        let bytes = tokio::fs::read(&path).await.ok()?;
        return Some(AttachmentPart::Image {
            mime_type: meta.mime_type.clone(),
            base64: BASE64.encode(bytes),
            filename: meta.original_filename.clone(),
        });
    }

    if TEXT_LIKE_MIMES.contains(&meta.mime_type.as_str()) {
        let bytes = tokio::fs::read(&path).await.ok()?;
        let (content, _) = extractor::decode_text(&bytes);
        return Some(AttachmentPart::TextDocument {
            filename: meta.original_filename.clone(),
            content,
        });
    }

    if EXTRACTABLE_MIMES.contains(&meta.mime_type.as_str()) {
        if native_pdf && meta.mime_type == "application/pdf" {
            let bytes = tokio::fs::read(&path).await.ok()?;
            return Some(AttachmentPart::NativePdf {
                filename: meta.original_filename.clone(),
                base64: BASE64.encode(bytes),
            });
        }

        let ext = crate::validation::file_extension(&meta.original_filename)?;
        let extract_path = path.clone();
        let result =
            tokio::task::spawn_blocking(move || extractor::extract(&extract_path, &ext))
                .await
                .ok()?;

        if let Some(error) = result.error {
            tracing::warn!("[Attachments] Extraction warning: {}", error);
            return None;
        }
        if result.text.trim().is_empty() {
            return None;
        }

        return Some(AttachmentPart::TextDocument {
            filename: meta.original_filename.clone(),
            content: result.text,
        });
    }

    None
}
