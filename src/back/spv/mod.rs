/*! Standard Portable Intermediate Representation (SPIR-V) backend
!*/

mod helpers;
mod instructions;
mod writer;

pub use writer::{write_vec, Writer};

bitflags::bitflags! {
    pub struct WriterFlags: u32 {
        /// Include debug labels for named objects.
        const DEBUG = 0x1;
    }
}

use spirv::{Op, Word};
use thiserror::Error;

/// Tool-generator magic in the module header.
const GENERATOR_MAGIC: Word = u32::from_le_bytes(*b"TINY");

/// SPIR-V 1.0, the version every Vulkan driver accepts.
const LANG_VERSION: Word = 0x0001_0000;

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("an instruction was used before receiving a result id")]
    UnassignedId,
    #[error("block is missing a terminator")]
    MissingTerminator,
    #[error("module invariant broken: {0}")]
    Validation(&'static str),
}

struct Instruction {
    op: Op,
    wc: u32,
    type_id: Option<Word>,
    result_id: Option<Word>,
    operands: Vec<Word>,
}

impl Instruction {
    fn new(op: Op) -> Self {
        Instruction {
            op,
            wc: 1, // Always start at 1 for the instruction length
            type_id: None,
            result_id: None,
            operands: vec![],
        }
    }

    fn set_type(&mut self, id: Word) {
        assert!(self.type_id.is_none(), "Type can only be set once");
        self.type_id = Some(id);
        self.wc += 1;
    }

    fn set_result(&mut self, id: Word) {
        assert!(self.result_id.is_none(), "Result can only be set once");
        self.result_id = Some(id);
        self.wc += 1;
    }

    fn add_operand(&mut self, operand: Word) {
        self.operands.push(operand);
        self.wc += 1;
    }

    fn add_operands(&mut self, operands: Vec<Word>) {
        for operand in operands.into_iter() {
            self.add_operand(operand)
        }
    }

    fn to_words(&self, sink: &mut Vec<Word>) {
        sink.push(self.wc << 16 | self.op as u32);
        sink.extend(self.type_id);
        sink.extend(self.result_id);
        sink.extend(self.operands.iter().cloned());
    }
}

#[derive(Default)]
struct IdGenerator(Word);

impl IdGenerator {
    fn next(&mut self) -> Word {
        self.0 += 1;
        self.0
    }

    /// One past the largest id handed out so far.
    fn bound(&self) -> Word {
        self.0 + 1
    }
}
