//! Caller-selected compilation settings.
use smol_str::SmolStr;

/// How parse errors propagate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiagnosticMode {
    /// Stop at the first error.
    #[default]
    FailFast,
    /// Record errors, resynchronise at the next statement and keep going.
    Accumulate,
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Name used in diagnostics and stored as the main proto's source.
    pub chunk_name: SmolStr,
    pub mode: DiagnosticMode,
    /// Accumulate mode gives up once this many errors are held.
    pub max_diagnostics: usize,
    pub fold_constants: bool,
    /// Log every emitted instruction at trace level.
    pub trace_emission: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            chunk_name: SmolStr::new_inline("main"),
            mode: DiagnosticMode::FailFast,
            max_diagnostics: 32,
            fold_constants: true,
            trace_emission: false,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.chunk_name = name.into();
        self
    }

    pub fn with_mode(mut self, mode: DiagnosticMode) -> Self {
        self.mode = mode;
        self
    }

    /// Accumulate mode holding at most `max` errors.
    pub fn accumulate(mut self, max: usize) -> Self {
        self.mode = DiagnosticMode::Accumulate;
        self.max_diagnostics = max.max(1);
        self
    }

    pub fn with_constant_folding(mut self, on: bool) -> Self {
        self.fold_constants = on;
        self
    }

    pub fn with_trace_emission(mut self, on: bool) -> Self {
        self.trace_emission = on;
        self
    }
}
