pub mod api;

use async_trait::async_trait;
use std::path::Path;

use crate::error::UpstreamError;
use crate::models::ParsedPdf;

/// Abstract PDF-to-markdown parser. The only component that reads the
/// scratch file the worker downloads the PDF into.
#[async_trait]
pub trait PdfParser: Send + Sync {
    /// Parse the PDF at `path` into markdown (tables inline) plus its page
    /// count. An empty `markdown` means the document had no extractable
    /// text; the caller decides what to do with that.
    async fn parse(&self, path: &Path, filename: &str) -> Result<ParsedPdf, UpstreamError>;
}
