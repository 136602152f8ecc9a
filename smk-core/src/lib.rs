// Copyright 2025 0xjcf
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # smk
//! A compiler for hierarchical state machines.
//!
//! A machine is described as a tree of nested states with guarded transitions
//! and entry, exit and initial actions. The compiler validates the tree,
//! flattens it into a state-by-event table where every handler carries its
//! complete action sequence, and renders that table as C dispatch code.
//!
//! ```no_run
//! use smk_core::{CompileOptions, compile};
//!
//! let text = std::fs::read_to_string("player.xml")?;
//! for (path, outcome) in compile(&text, &CompileOptions::default())? {
//!     println!("{}: {outcome:?}", path.display());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod format;
pub mod model;
pub mod node;
pub mod schema;

use std::path::PathBuf;

pub use error::{Error, NodeError};
pub use format::{FormatError, FormatterKind, WriteOutcome};
pub use model::{ElaborationOptions, Model, build_model};
pub use schema::Machine;

/// Everything a compile run needs besides the input text.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub format: FormatterKind,
    /// Requested output path; formatter defaults when `None`.
    pub output: Option<PathBuf>,
    pub elaboration: ElaborationOptions,
    /// `NAME=value` symbol overrides.
    pub defines: Vec<String>,
}

/// Parses, elaborates and renders `text`, committing the output files.
///
/// # Errors
/// The first parse or validation failure, or any generation failure. Outputs
/// are removed when generation fails.
pub fn compile(text: &str, options: &CompileOptions) -> Result<Vec<(PathBuf, WriteOutcome)>, Error> {
    let machine = Machine::parse(text)?;
    let model = build_model(&machine, &options.elaboration);
    let written = format::generate(
        options.format,
        &machine,
        &model,
        options.output.as_deref(),
        &options.defines,
    )?;
    Ok(written)
}
