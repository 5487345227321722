//! Content generation for purchased artifacts.
//!
//! The document renderer is an external collaborator; from the shop's
//! perspective it is a pure function from a product to a downloadable byte
//! stream. [`PdfStubGenerator`] is the built-in implementation producing a
//! placeholder study-guide PDF; tests substitute their own generator via
//! [`crate::state::AppState`].

use crate::models::Product;

/// A downloadable artifact: bytes plus the response metadata.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

/// Pure, side-effect-free producer of download artifacts.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, product: &Product) -> Artifact;
}

/// Generates a minimal single-page PDF naming the exam.
pub struct PdfStubGenerator;

impl ContentGenerator for PdfStubGenerator {
    fn generate(&self, product: &Product) -> Artifact {
        let exam_code = product.exam_code.as_deref().unwrap_or("N/A");
        let body = format!(
            "BT\n\
             /F1 24 Tf\n\
             50 750 Td\n\
             ({}) Tj\n\
             0 -50 Td\n\
             /F1 12 Tf\n\
             (Exam Code: {exam_code}) Tj\n\
             0 -30 Td\n\
             (Practice Questions and Study Material) Tj\n\
             ET",
            pdf_escape(&product.exam_name),
        );

        let pdf = format!(
            "%PDF-1.4\n\
             1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
             2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
             3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>\nendobj\n\
             4 0 obj\n<< /Length {} >>\nstream\n{body}\nendstream\nendobj\n\
             5 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n\
             trailer\n<< /Size 6 /Root 1 0 R >>\n%%EOF\n",
            body.len(),
        );

        Artifact {
            bytes: pdf.into_bytes(),
            content_type: "application/pdf",
            filename: format!("{}.pdf", sanitize_filename(&product.exam_name)),
        }
    }
}

/// Escape characters with meaning inside a PDF string literal.
fn pdf_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// Lowercase the name and collapse anything non-alphanumeric to underscores,
/// keeping attachment filenames header-safe.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use certdeck_core::{Price, ProductId};

    use super::*;

    fn product(name: &str, code: Option<&str>) -> Product {
        Product {
            id: ProductId::new(1),
            exam_name: name.to_owned(),
            exam_code: code.map(str::to_owned),
            description: String::new(),
            difficulty_level: "Intermediate".to_owned(),
            price: Price::from_cents(2500),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("Platform Administrator (ADM-201)"),
            "platform_administrator__adm_201_"
        );
    }

    #[test]
    fn test_generated_artifact_shape() {
        let artifact = PdfStubGenerator.generate(&product("Platform App Builder", Some("APB-301")));
        assert_eq!(artifact.content_type, "application/pdf");
        assert_eq!(artifact.filename, "platform_app_builder.pdf");
        assert!(artifact.bytes.starts_with(b"%PDF-1.4"));

        let text = String::from_utf8(artifact.bytes).expect("utf8");
        assert!(text.contains("Platform App Builder"));
        assert!(text.contains("APB-301"));
    }

    #[test]
    fn test_parens_in_exam_name_escaped() {
        let artifact = PdfStubGenerator.generate(&product("Admin (Advanced)", None));
        let text = String::from_utf8(artifact.bytes).expect("utf8");
        assert!(text.contains("Admin \\(Advanced\\)"));
    }
}
