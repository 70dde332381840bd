//! Multimodal prompt assembly, grounded on
//! `original_source::strands_agent.multimodal.prompt_builder` (the
//! text-plus-marker / per-file dispatch shape) and `.document_handler`
//! (extension-to-format mapping), retargeted at
//! [`agentcore_core::model::ContentBlock`] instead of a raw Bedrock
//! `ContentBlock` dict.

use agentcore_core::model::ContentBlock;

use crate::error::{PromptError, Result};

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    (".png", "png"),
    (".jpg", "jpeg"),
    (".jpeg", "jpeg"),
    (".gif", "gif"),
    (".webp", "webp"),
];

const DOCUMENT_EXTENSIONS: &[(&str, &str)] = &[
    (".pdf", "pdf"),
    (".csv", "csv"),
    (".doc", "doc"),
    (".docx", "docx"),
    (".xls", "xls"),
    (".xlsx", "xlsx"),
    (".html", "html"),
    (".txt", "txt"),
    (".md", "md"),
];

/// A file attached to a turn. Bytes are expected already base64-decoded —
/// decoding belongs to the HTTP boundary, not this crate.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn extension_format<'a>(filename: &str, table: &'a [(&str, &str)]) -> Option<&'a str> {
    let lower = filename.to_lowercase();
    table
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, fmt)| *fmt)
}

fn is_image(content_type: &str, filename: &str) -> bool {
    content_type.to_lowercase().starts_with("image/") || extension_format(filename, IMAGE_EXTENSIONS).is_some()
}

fn is_document(filename: &str) -> bool {
    extension_format(filename, DOCUMENT_EXTENSIONS).is_some()
}

/// Bedrock document names may only contain alphanumerics, whitespace,
/// hyphens, parentheses, and square brackets, with no run of consecutive
/// whitespace; this collapses anything else into a single underscore and
/// caps length so a pathological filename can't blow out the request.
pub fn sanitize_filename(filename: &str) -> String {
    let mut out = String::with_capacity(filename.len());
    let mut last_was_space = false;
    for c in filename.chars() {
        let allowed = c.is_alphanumeric() || matches!(c, '-' | '(' | ')' | '[' | ']' | ' ');
        if allowed {
            if c == ' ' {
                if !last_was_space {
                    out.push(' ');
                }
                last_was_space = true;
            } else {
                out.push(c);
                last_was_space = false;
            }
        } else if !last_was_space {
            out.push('_');
            last_was_space = true;
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

fn process_attachment(attachment: &Attachment) -> Result<ContentBlock> {
    if is_image(&attachment.content_type, &attachment.filename) {
        let format = extension_format(&attachment.filename, IMAGE_EXTENSIONS).unwrap_or("png");
        return Ok(ContentBlock::Image {
            format: format.to_string(),
            bytes: attachment.bytes.clone(),
        });
    }
    if is_document(&attachment.filename) {
        let format = extension_format(&attachment.filename, DOCUMENT_EXTENSIONS).unwrap_or("txt");
        return Ok(ContentBlock::Document {
            format: format.to_string(),
            name: sanitize_filename(&attachment.filename),
            bytes: attachment.bytes.clone(),
        });
    }
    Err(PromptError::UnsupportedAttachment {
        filename: attachment.filename.clone(),
        content_type: attachment.content_type.clone(),
    })
}

/// Assemble the next-turn prompt (spec §4.6). Text-only messages pass
/// through as a single text block; attachments are appended after a
/// text block carrying an audit marker so the session history remains
/// self-describing without needing to re-read attachment metadata.
/// Unsupported attachments are skipped with a warning, not failed.
pub fn build_prompt(message: &str, attachments: &[Attachment]) -> Vec<ContentBlock> {
    if attachments.is_empty() {
        return vec![ContentBlock::text(message)];
    }

    let names: Vec<&str> = attachments.iter().map(|a| a.filename.as_str()).collect();
    let text = format!("{message}\n\n[Attached files: {}]", names.join(", "));

    let mut blocks = vec![ContentBlock::text(text)];
    for attachment in attachments {
        match process_attachment(attachment) {
            Ok(block) => blocks.push(block),
            Err(err) => tracing::warn!(error = %err, "skipping unsupported attachment"),
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(filename: &str, content_type: &str) -> Attachment {
        Attachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn text_only_passes_through_without_a_marker() {
        let blocks = build_prompt("hello", &[]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].as_text(), Some("hello"));
    }

    #[test]
    fn attachments_add_an_audit_marker_and_content_blocks() {
        let blocks = build_prompt("check this out", &[attachment("report.pdf", "application/pdf")]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[0].as_text(),
            Some("check this out\n\n[Attached files: report.pdf]")
        );
        assert!(matches!(blocks[1], ContentBlock::Document { ref format, .. } if format == "pdf"));
    }

    #[test]
    fn image_content_type_wins_over_extension_ambiguity() {
        let blocks = build_prompt("see attached", &[attachment("photo", "image/png")]);
        assert!(matches!(blocks[1], ContentBlock::Image { ref format, .. } if format == "png"));
    }

    #[test]
    fn unsupported_attachment_is_skipped_not_fatal() {
        let blocks = build_prompt("weird file", &[attachment("binary.exe", "application/octet-stream")]);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn sanitize_filename_collapses_disallowed_runs() {
        assert_eq!(sanitize_filename("my report!! (final).pdf"), "my report_(final)_pdf");
    }
}
