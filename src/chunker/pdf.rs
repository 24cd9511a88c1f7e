use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

/// Runs `pdftotext -layout` and returns one string per page. Trailing blank
/// pages are dropped; interior blank pages are kept so page numbers line up.
pub(super) fn extract_pages_with_pdftotext(pdf_path: &Path) -> Result<Vec<String>> {
    if !pdf_path.is_file() {
        bail!("pdf not found: {}", pdf_path.display());
    }

    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg("-enc")
        .arg("UTF-8")
        .arg(pdf_path)
        .arg("-")
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    Ok(split_pages(&raw))
}

pub(super) fn split_pages(raw: &str) -> Vec<String> {
    let mut pages: Vec<String> = raw
        .split('\u{000C}')
        .map(|page| page.replace('\u{0000}', ""))
        .collect();

    while pages.last().is_some_and(|page| page.trim().is_empty()) {
        pages.pop();
    }

    pages
}
