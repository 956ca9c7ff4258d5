pub mod idcard;
pub mod sf9;

use crate::workbook::WorkbookError;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error("failed to encode QR code: {0}")]
    Qr(String),
    #[error("unsupported page {0}")]
    UnknownPage(u32),
}

/// Escapes text for use inside XML/HTML attributes and element bodies.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
