//! The per-request execution pipeline.
//!
//! One request runs the stages strictly in order: compile, diagnose, prepare
//! (user annotation and disassembly), execute, conditional post-processing,
//! serialize. Any stage may fail; every exit path frees exactly the handles
//! it owns, which the RAII wrappers in [`handles`](crate::handles) make the
//! default rather than something each branch has to remember.

use std::fmt;

use crate::diagnostics::{DiagnosticSlot, SourceContext};
use crate::handles::{CompileOutcome, RunOutput};
use crate::session::Session;

/// The wire-visible category of a request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// No session exists; the kernel never initialized.
    InitFailure,
    /// The toolchain itself failed while compiling.
    InternalCompile,
    /// The snippet has source errors. Expected, not a bridge fault.
    Compile,
    /// The toolchain failed while annotating or disassembling the workflow.
    InternalDisassemble,
    /// The remote execution failed.
    InternalExecute,
    /// Post-processing or serializing the result failed.
    InternalProcess,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitFailure => "init_failure",
            Self::InternalCompile => "internal_compile_error",
            Self::Compile => "compile_error",
            Self::InternalDisassemble => "internal_disassemble_error",
            Self::InternalExecute => "internal_execute_error",
            Self::InternalProcess => "internal_process_error",
        }
    }

    /// Whether this failure is the caller's own source being at fault, as
    /// opposed to a bridge/toolchain fault.
    pub fn is_source_fault(&self) -> bool {
        matches!(self, Self::Compile)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request: category plus rendered message.
#[derive(Debug)]
pub struct ExecuteFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl ExecuteFailure {
    fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecuteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl std::error::Error for ExecuteFailure {}

/// A successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOutput {
    /// Rendered source warnings, if the snippet produced any. Informational.
    pub warnings: Option<String>,
    /// The workflow's disassembled display form.
    pub assembly: Option<String>,
    /// Output the workflow printed while running, if non-empty. Published
    /// before the final value.
    pub prints: Option<String>,
    /// The serialized final value of the workflow.
    pub value: String,
}

impl Session {
    /// Drive one request through the full pipeline.
    ///
    /// `label` describes where the snippet came from (e.g. `<cell 3>`) and is
    /// used in rendered diagnostics; `source` is the raw SkiffScript text.
    pub fn execute(&mut self, label: &str, source: &str) -> Result<ExecuteOutput, ExecuteFailure> {
        // Stage 1: compile.
        tracing::debug!(label, "compiling snippet");
        let CompileOutcome {
            diagnostics,
            workflow,
        } = self.compiler.compile(label, source).map_err(|e| {
            ExecuteFailure::new(
                FailureCategory::InternalCompile,
                format!("An internal error occurred while compiling the snippet:\n\n{e}"),
            )
        })?;

        // Stage 2: diagnose, one slot at a time. The internal slot wins; a
        // workflow that arrived alongside it is dropped untouched.
        let context = SourceContext { label, source };
        if diagnostics.has_internal() {
            let rendered = diagnostics
                .render(DiagnosticSlot::Internal, None)
                .unwrap_or_else(|e| e.to_string());
            return Err(ExecuteFailure::new(
                FailureCategory::InternalCompile,
                format!("An internal error occurred while compiling the snippet:\n\n{rendered}"),
            ));
        }
        if diagnostics.has_errors() {
            let rendered = diagnostics
                .render(DiagnosticSlot::Errors, Some(context))
                .unwrap_or_else(|e| e.to_string());
            return Err(ExecuteFailure::new(FailureCategory::Compile, rendered));
        }
        let warnings = if diagnostics.has_warnings() {
            tracing::debug!(label, "snippet compiled with warnings");
            Some(
                diagnostics
                    .render(DiagnosticSlot::Warnings, Some(context))
                    .unwrap_or_else(|e| e.to_string()),
            )
        } else {
            None
        };
        drop(diagnostics);

        // An error-free bundle without a workflow is a toolchain contract
        // violation, not a source fault.
        let mut workflow = workflow.ok_or_else(|| {
            ExecuteFailure::new(
                FailureCategory::InternalCompile,
                "An internal error occurred while compiling the snippet:\n\n\
                 the compiler produced neither a workflow nor an error",
            )
        })?;

        // Stage 3: prepare. Annotate the receiving user and disassemble for
        // display. The workflow is dropped on the way out of either failure.
        if let Some(user) = self.result_user.clone() {
            workflow.set_user(&user).map_err(|e| {
                ExecuteFailure::new(
                    FailureCategory::InternalDisassemble,
                    format!("An internal error occurred while preparing the snippet:\n\n{e}"),
                )
            })?;
        }
        let assembly = workflow.disassemble().map_err(|e| {
            ExecuteFailure::new(
                FailureCategory::InternalDisassemble,
                format!("An internal error occurred while disassembling the snippet:\n\n{e}"),
            )
        })?;

        // Stage 4: execute. `run` consumes the workflow on both outcomes.
        tracing::debug!(label, "executing compiled workflow");
        let RunOutput { prints, value } = self.executor.run(workflow).map_err(|e| {
            ExecuteFailure::new(FailureCategory::InternalExecute, e.to_string())
        })?;
        let prints = if prints.is_empty() {
            None
        } else {
            tracing::debug!(label, bytes = prints.len(), "workflow captured print output");
            Some(prints)
        };

        // Stage 5: conditional post-processing.
        if value.needs_processing() {
            tracing::debug!(label, "processing returned result");
            if let Err(e) = self.executor.process(&value, &self.data_dir) {
                // `value` is dropped on the way out.
                return Err(ExecuteFailure::new(
                    FailureCategory::InternalProcess,
                    format!("An internal error occurred while processing the result:\n\n{e}"),
                ));
            }
        }

        // Stage 6: serialize and destroy the value.
        tracing::debug!(label, "serializing returned result");
        let value = value.into_display(&self.data_dir).map_err(|e| {
            ExecuteFailure::new(
                FailureCategory::InternalProcess,
                format!("An internal error occurred while serializing the result:\n\n{e}"),
            )
        })?;

        Ok(ExecuteOutput {
            warnings,
            assembly: Some(assembly),
            prints,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_wire_names() {
        assert_eq!(FailureCategory::InitFailure.as_str(), "init_failure");
        assert_eq!(
            FailureCategory::InternalCompile.as_str(),
            "internal_compile_error"
        );
        assert_eq!(FailureCategory::Compile.as_str(), "compile_error");
        assert_eq!(
            FailureCategory::InternalDisassemble.as_str(),
            "internal_disassemble_error"
        );
        assert_eq!(
            FailureCategory::InternalExecute.as_str(),
            "internal_execute_error"
        );
        assert_eq!(
            FailureCategory::InternalProcess.as_str(),
            "internal_process_error"
        );
    }

    #[test]
    fn only_compile_errors_are_source_faults() {
        assert!(FailureCategory::Compile.is_source_fault());
        assert!(!FailureCategory::InternalCompile.is_source_fault());
        assert!(!FailureCategory::InternalExecute.is_source_fault());
    }

    #[test]
    fn failure_displays_category_and_message() {
        let failure = ExecuteFailure::new(FailureCategory::Compile, "undefined function `foo`");
        assert_eq!(
            failure.to_string(),
            "[compile_error] undefined function `foo`"
        );
    }
}
