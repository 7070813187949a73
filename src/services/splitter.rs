//! Rasterize PDF flyers into one image per page using Poppler.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// PDF user-space resolution: one pixel per point.
pub const NATIVE_DPI: u32 = 72;

/// Errors that can occur while splitting a document.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("failed to open pdf: {0}")]
    Open(String),

    #[error("failed to render pages: {0}")]
    Render(String),

    #[error("rendered {found} of {expected} pages")]
    MissingPages { expected: u32, found: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rendered page images living in a private temporary directory.
///
/// The directory and every page file are removed when this value is dropped.
#[derive(Debug)]
pub struct SplitDocument {
    dir: TempDir,
    pages: Vec<PathBuf>,
}

impl SplitDocument {
    /// Page image paths in page order.
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Splits PDFs into PNG page images with `pdfinfo` and `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PageSplitter {
    dpi: u32,
}

impl Default for PageSplitter {
    fn default() -> Self {
        Self::new(NATIVE_DPI)
    }
}

impl PageSplitter {
    pub fn new(dpi: u32) -> Self {
        Self { dpi: dpi.max(1) }
    }

    /// Check whether the Poppler tools this splitter needs are installed.
    pub fn tools_available() -> bool {
        ["pdfinfo", "pdftoppm"]
            .iter()
            .all(|tool| which::which(tool).is_ok())
    }

    /// Render every page of `pdf` into its own PNG.
    ///
    /// Either all pages are rendered or an error is returned.
    pub fn split_document(&self, pdf: &[u8]) -> Result<SplitDocument, SplitError> {
        let dir = TempDir::new()?;
        let input = dir.path().join("input.pdf");
        std::fs::write(&input, pdf)?;

        let expected = page_count(&input)?;
        if expected == 0 {
            return Err(SplitError::Open("document has no pages".to_string()));
        }

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &self.dpi.to_string()])
            .arg(&input)
            .arg(dir.path().join("page"))
            .output();
        let output = tool_output(output, "pdftoppm (install poppler-utils)")?;
        if !output.status.success() {
            return Err(SplitError::Render(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let mut numbered: Vec<(u32, PathBuf)> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| page_number(&p).map(|n| (n, p)))
            .collect();
        numbered.sort_by_key(|(n, _)| *n);

        if numbered.len() != expected as usize {
            return Err(SplitError::MissingPages {
                expected,
                found: numbered.len(),
            });
        }

        debug!(pages = expected, dpi = self.dpi, "Split PDF into page images");
        Ok(SplitDocument {
            dir,
            pages: numbered.into_iter().map(|(_, p)| p).collect(),
        })
    }
}

fn tool_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
) -> Result<std::process::Output, SplitError> {
    match result {
        Ok(output) => Ok(output),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SplitError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(SplitError::Io(e)),
    }
}

/// Page count reported by `pdfinfo`.
fn page_count(path: &Path) -> Result<u32, SplitError> {
    let output = tool_output(
        Command::new("pdfinfo").arg(path).output(),
        "pdfinfo (install poppler-utils)",
    )?;

    if !output.status.success() {
        return Err(SplitError::Open(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or_else(|| SplitError::Open("pdfinfo reported no page count".to_string()))
}

/// `page-07.png` -> 7. pdftoppm zero-pads to the width of the page count.
fn page_number(path: &Path) -> Option<u32> {
    if path.extension()? != "png" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal multi-page PDF with blank pages.
    fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                (0..pages)
                    .map(|i| format!("{} 0 R", i + 3))
                    .collect::<Vec<_>>()
                    .join(" "),
                pages
            ),
        ];
        for _ in 0..pages {
            objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 300] >>".to_string());
        }

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, obj) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, obj).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_page_number() {
        assert_eq!(page_number(Path::new("/t/page-07.png")), Some(7));
        assert_eq!(page_number(Path::new("/t/page-12.png")), Some(12));
        assert_eq!(page_number(Path::new("/t/input.pdf")), None);
    }

    #[test]
    fn test_split_document_orders_pages() {
        if !PageSplitter::tools_available() {
            eprintln!("Skipping: pdfinfo or pdftoppm not available");
            return;
        }

        let split = PageSplitter::default()
            .split_document(&blank_pdf(3))
            .unwrap();
        assert_eq!(split.len(), 3);
        for (i, page) in split.pages().iter().enumerate() {
            assert_eq!(page_number(page), Some(i as u32 + 1));
        }

        let first = image::open(&split.pages()[0]).unwrap();
        assert_eq!((first.width(), first.height()), (200, 300));

        let dir = split.dir().to_path_buf();
        drop(split);
        assert!(!dir.exists());
    }

    #[test]
    fn test_split_document_rejects_garbage() {
        assert!(PageSplitter::default()
            .split_document(b"definitely not a pdf")
            .is_err());
    }
}
