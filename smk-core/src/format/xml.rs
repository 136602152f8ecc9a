//! Re-serializes the machine document.

use super::{FormatError, Formatter, Session};
use crate::model::Model;
use crate::schema::Machine;

/// Writes the parsed machine back as XML, without symbol substitution.
///
/// Implicit elements added during validation, such as the reset transition of
/// a single-state machine, appear in the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFormatter;

impl Formatter for XmlFormatter {
    fn default_filenames(&self) -> &'static [&'static str] {
        &["output.xml"]
    }

    fn generate(
        &self,
        session: &mut Session,
        machine: &Machine,
        _model: &Model,
    ) -> Result<(), FormatError> {
        session.write_raw(0, &machine.to_xml());
        Ok(())
    }
}
