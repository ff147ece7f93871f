//! Attachment encoding: turn an uploaded file into a message part.
//!
//! Document types get a text part with placeholder extraction (real PDF/DOCX
//! extraction is out of scope and mocked); images become base64 inline data.
//! Unsupported types are rejected synchronously, before any state mutation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::chat::{ChatError, Part};

const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
const SUPPORTED_DOC_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/pdf",
];

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub fn is_supported_mime(mime_type: &str) -> bool {
    SUPPORTED_IMAGE_TYPES.contains(&mime_type) || SUPPORTED_DOC_TYPES.contains(&mime_type)
}

/// Convert an uploaded file into a part for inclusion in a user turn.
pub fn file_to_part(file_name: &str, mime_type: &str, bytes: &[u8]) -> Result<Part, ChatError> {
    if !is_supported_mime(mime_type) {
        return Err(ChatError::invalid_input(format!(
            "Unsupported file type: {mime_type}"
        )));
    }

    if mime_type == DOCX_MIME {
        return Ok(Part::text(format!(
            "User uploaded a document named \"{file_name}\". The extracted content is:\n\n{}",
            mock_docx_text(file_name)
        )));
    }

    if mime_type == "application/pdf" {
        return Ok(Part::text(format!(
            "User uploaded a document named \"{file_name}\". The extracted content is:\n\n{}",
            mock_pdf_text(file_name)
        )));
    }

    Ok(Part::inline_data(mime_type, BASE64.encode(bytes)))
}

// Placeholder for DOCX content extraction.
fn mock_docx_text(file_name: &str) -> String {
    format!(
        "--- MOCK DOCUMENT CONTENT ---\nFile: {file_name}\n\nThis is a placeholder for the content of your Word document. In a real application, this text would be extracted from the DOCX file. You can now ask questions about this document as if its full content were present.\n\nKey areas of focus for legal documents:\n- Definitions: Check how key terms are defined.\n- Obligations and Responsibilities: Who is required to do what?\n- Payment Terms: Amounts, due dates, and penalties for late payment.\n- Term and Termination: How long does the agreement last, and how can it be ended?\n- Liability and Indemnification: Who is responsible if something goes wrong?\n- Confidentiality: Are there any clauses about keeping information private?\n--- END MOCK CONTENT ---"
    )
}

// Placeholder for PDF content extraction.
fn mock_pdf_text(file_name: &str) -> String {
    format!(
        "--- MOCK PDF CONTENT ---\nFile: {file_name}\n\nThis is a placeholder for the content of your PDF document. In a real application, this text would be extracted from the PDF file. You can now ask questions about this document as if its full content were present.\n\nExample legal clauses often found in PDFs:\n- Force Majeure: Events beyond the reasonable control of a party.\n- Governing Law: The jurisdiction whose laws will interpret the contract.\n- Dispute Resolution: Procedures for handling disagreements, such as arbitration or mediation.\n--- END MOCK CONTENT ---"
    )
}
