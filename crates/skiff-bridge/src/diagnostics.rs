//! The diagnostics bundle produced by compilation, and its rendering.
//!
//! A bundle carries three independent slots: source warnings, source errors,
//! and a non-source internal error. Any subset may be populated at once, so
//! every slot is tested separately before rendering; rendering an empty slot
//! is a no-op.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::api::ToolchainApi;
use crate::api::raw::RawSourceDiagnostics;
use crate::error::Result;

/// One of the three slots of a diagnostics bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSlot {
    /// Source warnings. Informational; never fatal to the request.
    Warnings,
    /// Source errors. Fatal to the request, not to the process.
    Errors,
    /// An internal toolchain error. Fatal to the request and reported as a
    /// bridge fault.
    Internal,
}

/// The `(label, source)` pair a snippet was compiled from, used to render
/// source diagnostics with surrounding context.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub label: &'a str,
    pub source: &'a str,
}

/// An owned diagnostics bundle. Freed exactly once on drop.
pub struct SourceDiagnostics {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawSourceDiagnostics>,
}

// SAFETY: the bundle is toolchain-owned state reachable only through this
// single-owner wrapper; the toolchain does not tie it to the creating thread.
unsafe impl Send for SourceDiagnostics {}

impl SourceDiagnostics {
    pub(crate) fn from_raw(api: Arc<dyn ToolchainApi>, raw: NonNull<RawSourceDiagnostics>) -> Self {
        Self { api, raw }
    }

    /// Whether the given slot is populated.
    pub fn has(&self, slot: DiagnosticSlot) -> bool {
        self.api.diag_has(self.raw, slot)
    }

    pub fn has_warnings(&self) -> bool {
        self.has(DiagnosticSlot::Warnings)
    }

    pub fn has_errors(&self) -> bool {
        self.has(DiagnosticSlot::Errors)
    }

    pub fn has_internal(&self) -> bool {
        self.has(DiagnosticSlot::Internal)
    }

    /// Whether no slot at all is populated.
    pub fn is_empty(&self) -> bool {
        !self.has_warnings() && !self.has_errors() && !self.has_internal()
    }

    /// Render one slot to an owned string. An empty slot renders as `""`.
    ///
    /// `context` is used for the source slots and ignored for the internal
    /// one.
    pub fn render(&self, slot: DiagnosticSlot, context: Option<SourceContext<'_>>) -> Result<String> {
        if !self.has(slot) {
            return Ok(String::new());
        }
        self.api
            .diag_render(self.raw, slot, context.map(|c| (c.label, c.source)))
    }

    /// Render one slot into a caller-supplied sink.
    pub fn render_to(
        &self,
        slot: DiagnosticSlot,
        sink: &mut dyn fmt::Write,
        context: Option<SourceContext<'_>>,
    ) -> Result<()> {
        let text = self.render(slot, context)?;
        if !text.is_empty() {
            // Sink failures have no useful recovery here; fold them into the
            // toolchain error channel.
            sink.write_str(&text)
                .map_err(|e| crate::error::Error::Toolchain(format!("diagnostics sink failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for SourceDiagnostics {
    fn drop(&mut self) {
        self.api.free_diagnostics(self.raw);
    }
}

impl fmt::Debug for SourceDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDiagnostics")
            .field("warnings", &self.has_warnings())
            .field("errors", &self.has_errors())
            .field("internal", &self.has_internal())
            .finish()
    }
}
