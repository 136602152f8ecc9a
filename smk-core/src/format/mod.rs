//! Output formatters.
//!
//! A formatter renders a parsed [`Machine`] and its elaborated [`Model`] into
//! one or more output streams of a [`Session`]. [`generate`] drives the whole
//! run and guarantees the output set is either fully committed or removed.

pub mod c;
pub mod output;
pub mod symbols;
pub mod xml;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::model::Model;
use crate::schema::Machine;

pub use output::{Session, SessionState, WriteOutcome, output_paths};
pub use symbols::{SymbolDef, SymbolTable, parse_define, substitute};

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("undefined symbol `{name}'")]
    UndefinedSymbol { name: String },
    #[error("symbol expansion still unresolved after {rounds} rounds")]
    RecursiveSymbol { rounds: usize },
    #[error("require an `=' in the define `{0}'")]
    BadDefine(String),
    #[error("cannot write `{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders a machine into the streams of a session.
pub trait Formatter {
    /// One default file name per output stream.
    fn default_filenames(&self) -> &'static [&'static str];

    /// Symbols the user may override with `-D`.
    fn symbol_definitions(&self) -> &'static [SymbolDef] {
        &[]
    }

    /// Writes every stream.
    ///
    /// # Errors
    /// Any substitution failure.
    fn generate(
        &self,
        session: &mut Session,
        machine: &Machine,
        model: &Model,
    ) -> Result<(), FormatError>;
}

/// The available formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterKind {
    /// C header and source with a state containment check.
    #[default]
    StaticIsIn,
    /// C header and source.
    Static,
    /// The machine document itself.
    Xml,
}

impl FormatterKind {
    pub const ALL: [FormatterKind; 3] = [
        FormatterKind::StaticIsIn,
        FormatterKind::Static,
        FormatterKind::Xml,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FormatterKind::StaticIsIn => "static-isin",
            FormatterKind::Static => "static",
            FormatterKind::Xml => "xml",
        }
    }

    #[must_use]
    pub fn formatter(self) -> Box<dyn Formatter> {
        match self {
            FormatterKind::StaticIsIn => Box::new(c::CFormatter::with_containment()),
            FormatterKind::Static => Box::new(c::CFormatter::plain()),
            FormatterKind::Xml => Box::new(xml::XmlFormatter),
        }
    }
}

impl fmt::Display for FormatterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormatterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|k| k.name()).collect();
                format!("unknown formatter `{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// Renders `model` with the formatter `kind` and commits the outputs.
///
/// `defines` are `NAME=value` symbol overrides. If anything fails after the
/// session is opened every target path is deleted.
///
/// # Errors
/// A malformed define, a substitution failure or an I/O failure.
pub fn generate<S: AsRef<str>>(
    kind: FormatterKind,
    machine: &Machine,
    model: &Model,
    requested: Option<&Path>,
    defines: &[S],
) -> Result<Vec<(PathBuf, WriteOutcome)>, FormatError> {
    let formatter = kind.formatter();
    let paths = output_paths(formatter.default_filenames(), requested);
    debug!(formatter = %kind, ?paths, "generating");

    let mut session = Session::new(
        paths,
        SymbolTable::from_definitions(formatter.symbol_definitions()),
    );
    let rendered = session
        .populate(defines)
        .and_then(|()| formatter.generate(&mut session, machine, model));
    match rendered {
        Ok(()) => session.close(),
        Err(e) => {
            warn!(error = %e, "generation failed, removing outputs");
            session.abort();
            Err(e)
        }
    }
}
