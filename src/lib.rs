//! HLSL to SPIR-V shader compiler.
//!
//! The entry point of the crate is [`compile`]: given a flat source buffer,
//! the name of the requested entry point and a [`ShaderStage`], it produces
//! the words of a SPIR-V module, or the list of [`Diagnostic`]s that
//! prevented emission.
//!
//! Compilation is a straight pipeline: the [front end][front] lexes and
//! parses the source into an AST and analyzes it, the [IR layer][ir] lowers
//! the analyzed AST into a typed SSA-style module, and the [back end][back]
//! serializes that module into the binary form consumed by Vulkan.
//!
//! To improve performance and reduce memory usage, most structures are
//! stored in an [`Arena`], and can be retrieved using the corresponding
//! [`Handle`].
#![allow(clippy::new_without_default)]
#![deny(clippy::panic)]

mod arena;
pub mod back;
pub mod front;
pub mod ir;

pub use crate::arena::{Arena, Handle};

use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::BuildHasherDefault,
};

/// Hash map that is faster but not resilient to DoS attacks.
pub type FastHashMap<K, T> = HashMap<K, T, BuildHasherDefault<fxhash::FxHasher>>;
/// Hash set that is faster but not resilient to DoS attacks.
pub type FastHashSet<K> = HashSet<K, BuildHasherDefault<fxhash::FxHasher>>;

/// Number of bytes.
pub type Bytes = u8;

/// Stage of the programmable pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)] // The names are self evident
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// The SPIR-V execution model of this stage.
    pub fn execution_model(self) -> spirv::ExecutionModel {
        match self {
            ShaderStage::Vertex => spirv::ExecutionModel::Vertex,
            ShaderStage::Fragment => spirv::ExecutionModel::Fragment,
            ShaderStage::Compute => spirv::ExecutionModel::GLCompute,
        }
    }
}

/// Primitive type for a scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Signed integer type.
    Sint,
    /// Unsigned integer type.
    Uint,
    /// Floating point type.
    Float,
    /// Boolean type.
    Bool,
}

/// A range of the source text, attached to tokens, AST nodes and
/// diagnostics. Lines and columns are 1-based.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Location {
    pub offset: u32,
    pub length: u32,
    pub line: u32,
    pub col: u32,
}

/// A single error produced by any phase of the compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    /// Path of the source the error points into.
    pub path: String,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub col: u32,
    /// Human readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.path, self.line, self.col, self.message
        )
    }
}

/// Shared sink for diagnostics, threaded through every phase.
///
/// Phases keep going past recoverable errors so that a single run surfaces
/// as many problems as possible; the presence of any entry prevents binary
/// emission.
#[derive(Debug)]
pub struct Diagnostics {
    path: String,
    list: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(path: &str) -> Self {
        Diagnostics {
            path: path.to_string(),
            list: Vec::new(),
        }
    }

    /// Record an error at the given source location.
    pub fn add(&mut self, location: Location, message: impl Into<String>) {
        self.list.push(Diagnostic {
            path: self.path.clone(),
            line: location.line,
            col: location.col,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.list
    }
}

/// A decoration to be attached to an id in the emitted module.
///
/// `operand` is `None` for flag-like decorations (`Block`, `BufferBlock`)
/// and `Some` for the ones carrying a value (`Location`, `Binding`, ...).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decoration {
    pub kind: spirv::Decoration,
    pub operand: Option<spirv::Word>,
}

impl Decoration {
    pub fn new(kind: spirv::Decoration) -> Self {
        Decoration {
            kind,
            operand: None,
        }
    }

    pub fn with(kind: spirv::Decoration, operand: spirv::Word) -> Self {
        Decoration {
            kind,
            operand: Some(operand),
        }
    }
}

/// A decoration attached to a member of a struct type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemberDecoration {
    pub kind: spirv::Decoration,
    pub member: u32,
    pub operand: Option<spirv::Word>,
}

impl MemberDecoration {
    pub fn new(kind: spirv::Decoration, member: u32) -> Self {
        MemberDecoration {
            kind,
            member,
            operand: None,
        }
    }

    pub fn with(kind: spirv::Decoration, member: u32, operand: spirv::Word) -> Self {
        MemberDecoration {
            kind,
            member,
            operand: Some(operand),
        }
    }
}

/// Compile an HLSL source buffer into a SPIR-V module.
///
/// `path` is only used to label diagnostics. The returned buffer is the
/// complete module, starting with the 5-word SPIR-V header.
pub fn compile(
    source: &str,
    path: &str,
    entry_point: &str,
    stage: ShaderStage,
) -> Result<Vec<u32>, Vec<Diagnostic>> {
    let mut diagnostics = Diagnostics::new(path);

    let tokens = front::hlsl::lex::tokenize(source, &mut diagnostics);
    let mut unit = front::hlsl::parse::parse(&tokens, &mut diagnostics);
    front::hlsl::sema::analyze(&mut unit, entry_point, stage, &mut diagnostics);

    if !diagnostics.is_empty() {
        return Err(diagnostics.into_vec());
    }

    let module = ir::lower::lower(&unit, &mut diagnostics);
    if !diagnostics.is_empty() {
        return Err(diagnostics.into_vec());
    }

    log::debug!(
        "lowered `{}`: {} functions, {} globals",
        entry_point,
        module.functions.len(),
        module.all_globals.len()
    );

    match back::spv::write_vec(&module) {
        Ok(words) => Ok(words),
        Err(error) => {
            diagnostics.add(
                Location::default(),
                format!("internal compiler error: {}", error),
            );
            Err(diagnostics.into_vec())
        }
    }
}
