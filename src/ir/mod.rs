//! Typed SSA-style intermediate representation.
//!
//! The IR mirrors the SPIR-V type and instruction universe closely enough
//! that the back end is a plain serialization pass: functions own blocks,
//! blocks own instructions, every block ends in a terminator, and branch
//! instructions carry the structured-control-flow merge and continue
//! targets that SPIR-V requires.

pub mod lower;

use crate::{
    arena::{Arena, Handle},
    Bytes, Decoration, FastHashMap, MemberDecoration, ShaderStage,
};

/// A type in the SPIR-V universe, interned per module: within one
/// [`Module`], equal `inner` values share a single handle.
#[derive(Debug)]
pub struct Type {
    pub inner: TypeInner,
    pub decorations: Vec<Decoration>,
    pub member_decorations: Vec<MemberDecoration>,
}

#[derive(Debug, PartialEq)]
pub enum TypeInner {
    Void,
    Bool,
    Float {
        width: Bytes,
    },
    Int {
        width: Bytes,
        signed: bool,
    },
    Vector {
        elem: Handle<Type>,
        size: u32,
    },
    Matrix {
        columns: u32,
        column: Handle<Type>,
    },
    RuntimeArray {
        base: Handle<Type>,
    },
    Pointer {
        class: spirv::StorageClass,
        base: Handle<Type>,
    },
    Function {
        ret: Handle<Type>,
        params: Vec<Handle<Type>>,
    },
    Struct {
        name: String,
        members: Vec<Handle<Type>>,
    },
    Sampler,
    Image {
        sampled: Handle<Type>,
        dim: spirv::Dim,
    },
    SampledImage {
        image: Handle<Type>,
    },
}

/// A scalar constant value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Sint(i64),
    Uint(u64),
    Float(f64),
}

impl ScalarValue {
    fn bits(self) -> u64 {
        match self {
            ScalarValue::Bool(v) => v as u64,
            ScalarValue::Sint(v) => v as u64,
            ScalarValue::Uint(v) => v,
            ScalarValue::Float(v) => v.to_bits(),
        }
    }
}

/// A single IR instruction. `ty` is the result type for value-producing
/// kinds, the pointer type for variables, and `None` for pure control
/// flow.
#[derive(Debug)]
pub struct Inst {
    pub ty: Option<Handle<Type>>,
    pub kind: InstKind,
    pub decorations: Vec<Decoration>,
}

#[derive(Debug)]
pub enum InstKind {
    Function {
        params: Vec<Handle<Inst>>,
        blocks: Vec<Handle<Inst>>,
    },
    Parameter {
        by_reference: bool,
    },
    Block {
        body: Vec<Handle<Inst>>,
    },
    Variable {
        class: spirv::StorageClass,
        init: Option<Handle<Inst>>,
    },
    Constant {
        value: ScalarValue,
    },
    Return {
        value: Option<Handle<Inst>>,
    },
    Discard,
    Store {
        pointer: Handle<Inst>,
        value: Handle<Inst>,
    },
    Load {
        pointer: Handle<Inst>,
    },
    AccessChain {
        base: Handle<Inst>,
        indices: Vec<Handle<Inst>>,
    },
    Call {
        function: Handle<Inst>,
        arguments: Vec<Handle<Inst>>,
    },
    Branch {
        target: Handle<Inst>,
        merge: Option<Handle<Inst>>,
        continuing: Option<Handle<Inst>>,
    },
    BranchConditional {
        condition: Handle<Inst>,
        accept: Handle<Inst>,
        reject: Handle<Inst>,
        merge: Option<Handle<Inst>>,
        continuing: Option<Handle<Inst>>,
    },
    /// An instruction from the GLSL.std.450 extended set.
    ExtInst {
        op: spirv::GLOp,
        arguments: Vec<Handle<Inst>>,
    },
    Barrier {
        /// `OpControlBarrier` when set, `OpMemoryBarrier` otherwise.
        execution_scope: Option<Handle<Inst>>,
        memory_scope: Handle<Inst>,
        semantics: Handle<Inst>,
    },
    Cast {
        op: spirv::Op,
        value: Handle<Inst>,
        /// Same-type casts forward the operand id instead of emitting.
        redundant: bool,
    },
    CompositeConstruct {
        components: Vec<Handle<Inst>>,
    },
    CompositeExtract {
        value: Handle<Inst>,
        indices: Vec<u32>,
    },
    VectorShuffle {
        left: Handle<Inst>,
        right: Handle<Inst>,
        pattern: Vec<u32>,
    },
    SampledImage {
        image: Handle<Inst>,
        sampler: Handle<Inst>,
    },
    SampleImplicitLod {
        sampled_image: Handle<Inst>,
        coordinate: Handle<Inst>,
    },
    Atomic {
        op: spirv::Op,
        pointer: Handle<Inst>,
        scope: Handle<Inst>,
        semantics: Vec<Handle<Inst>>,
        operands: Vec<Handle<Inst>>,
    },
    Unary {
        op: spirv::Op,
        expr: Handle<Inst>,
    },
    Binary {
        op: spirv::Op,
        left: Handle<Inst>,
        right: Handle<Inst>,
    },
}

/// Exported function, to be run at a certain stage in the pipeline.
#[derive(Debug)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStage,
    pub function: Handle<Inst>,
    pub workgroup_size: [u32; 3],
    /// The `Input`/`Output` variables referenced by this entry point, in
    /// the order they appear in `OpEntryPoint`.
    pub interface: Vec<Handle<Inst>>,
}

#[derive(PartialEq, Eq, Hash)]
struct ConstKey {
    ty: Handle<Type>,
    bits: u64,
}

/// A lowered shader module, ready for serialization.
#[derive(Default)]
pub struct Module {
    pub types: Arena<Type>,
    pub instructions: Arena<Inst>,
    pub functions: Vec<Handle<Inst>>,
    /// Deduplicated scalar constants in creation order.
    pub constants: Vec<Handle<Inst>>,
    /// Uniform and storage globals only.
    pub globals: Vec<Handle<Inst>>,
    /// All module-scope variables, including stage inputs and outputs.
    pub all_globals: Vec<Handle<Inst>>,
    pub entry_points: Vec<EntryPoint>,
    const_cache: FastHashMap<ConstKey, Handle<Inst>>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    //
    // Type interning
    //

    /// Fetch the canonical handle for a type, creating it on first use.
    /// Decorations are deliberately excluded from the comparison; they are
    /// attached to the canonical instance afterwards.
    pub fn get_type(&mut self, inner: TypeInner) -> Handle<Type> {
        if let Some((handle, _)) = self.types.iter().find(|(_, ty)| ty.inner == inner) {
            return handle;
        }
        self.types.append(Type {
            inner,
            decorations: Vec::new(),
            member_decorations: Vec::new(),
        })
    }

    pub fn type_void(&mut self) -> Handle<Type> {
        self.get_type(TypeInner::Void)
    }

    pub fn type_bool(&mut self) -> Handle<Type> {
        self.get_type(TypeInner::Bool)
    }

    pub fn type_float(&mut self, width: Bytes) -> Handle<Type> {
        self.get_type(TypeInner::Float { width })
    }

    pub fn type_int(&mut self, width: Bytes, signed: bool) -> Handle<Type> {
        self.get_type(TypeInner::Int { width, signed })
    }

    pub fn type_uint(&mut self) -> Handle<Type> {
        self.type_int(4, false)
    }

    pub fn type_vector(&mut self, elem: Handle<Type>, size: u32) -> Handle<Type> {
        self.get_type(TypeInner::Vector { elem, size })
    }

    pub fn type_matrix(&mut self, columns: u32, column: Handle<Type>) -> Handle<Type> {
        self.get_type(TypeInner::Matrix { columns, column })
    }

    pub fn type_pointer(
        &mut self,
        class: spirv::StorageClass,
        base: Handle<Type>,
    ) -> Handle<Type> {
        self.get_type(TypeInner::Pointer { class, base })
    }

    pub fn type_runtime_array(&mut self, base: Handle<Type>) -> Handle<Type> {
        self.get_type(TypeInner::RuntimeArray { base })
    }

    pub fn type_function(
        &mut self,
        ret: Handle<Type>,
        params: Vec<Handle<Type>>,
    ) -> Handle<Type> {
        self.get_type(TypeInner::Function { ret, params })
    }

    pub fn type_struct(&mut self, name: String, members: Vec<Handle<Type>>) -> Handle<Type> {
        self.get_type(TypeInner::Struct { name, members })
    }

    pub fn type_sampler(&mut self) -> Handle<Type> {
        self.get_type(TypeInner::Sampler)
    }

    pub fn type_image(&mut self, sampled: Handle<Type>, dim: spirv::Dim) -> Handle<Type> {
        self.get_type(TypeInner::Image { sampled, dim })
    }

    pub fn type_sampled_image(&mut self, image: Handle<Type>) -> Handle<Type> {
        self.get_type(TypeInner::SampledImage { image })
    }

    /// Attach a decoration to a type unless it is already present.
    pub fn decorate_type(&mut self, ty: Handle<Type>, decoration: Decoration) {
        let decorations = &mut self.types.get_mut(ty).decorations;
        if !decorations.contains(&decoration) {
            decorations.push(decoration);
        }
    }

    pub fn decorate_type_member(&mut self, ty: Handle<Type>, decoration: MemberDecoration) {
        let decorations = &mut self.types.get_mut(ty).member_decorations;
        if !decorations.contains(&decoration) {
            decorations.push(decoration);
        }
    }

    /// The pointee of a pointer type.
    pub fn pointer_base(&self, ty: Handle<Type>) -> Option<Handle<Type>> {
        match self.types[ty].inner {
            TypeInner::Pointer { base, .. } => Some(base),
            _ => None,
        }
    }

    //
    // Constants
    //

    /// The canonical instruction for a scalar constant: equal values of
    /// equal type share one instruction.
    pub fn constant(&mut self, ty: Handle<Type>, value: ScalarValue) -> Handle<Inst> {
        let key = ConstKey {
            ty,
            bits: value.bits(),
        };
        if let Some(&handle) = self.const_cache.get(&key) {
            return handle;
        }
        let handle = self.instructions.append(Inst {
            ty: Some(ty),
            kind: InstKind::Constant { value },
            decorations: Vec::new(),
        });
        self.const_cache.insert(key, handle);
        self.constants.push(handle);
        handle
    }

    pub fn const_uint(&mut self, value: u32) -> Handle<Inst> {
        let ty = self.type_uint();
        self.constant(ty, ScalarValue::Uint(value as u64))
    }

    pub fn const_bool(&mut self, value: bool) -> Handle<Inst> {
        let ty = self.type_bool();
        self.constant(ty, ScalarValue::Bool(value))
    }

    //
    // Functions, blocks and globals
    //

    pub fn add_function(&mut self, ty: Handle<Type>) -> Handle<Inst> {
        let handle = self.instructions.append(Inst {
            ty: Some(ty),
            kind: InstKind::Function {
                params: Vec::new(),
                blocks: Vec::new(),
            },
            decorations: Vec::new(),
        });
        self.functions.push(handle);
        handle
    }

    pub fn add_parameter(
        &mut self,
        function: Handle<Inst>,
        ty: Handle<Type>,
        by_reference: bool,
    ) -> Handle<Inst> {
        let handle = self.instructions.append(Inst {
            ty: Some(ty),
            kind: InstKind::Parameter { by_reference },
            decorations: Vec::new(),
        });
        if let InstKind::Function { ref mut params, .. } = self.instructions.get_mut(function).kind
        {
            params.push(handle);
        }
        handle
    }

    /// Create a block without attaching it; the lowering code controls
    /// the order in which blocks join their function.
    pub fn create_block(&mut self) -> Handle<Inst> {
        self.instructions.append(Inst {
            ty: None,
            kind: InstKind::Block { body: Vec::new() },
            decorations: Vec::new(),
        })
    }

    /// Finally adds the block to the function.
    pub fn attach_block(&mut self, function: Handle<Inst>, block: Handle<Inst>) {
        if let InstKind::Function { ref mut blocks, .. } = self.instructions.get_mut(function).kind
        {
            blocks.push(block);
        }
    }

    pub fn add_global(
        &mut self,
        ty: Handle<Type>,
        class: spirv::StorageClass,
    ) -> Handle<Inst> {
        let ptr = self.type_pointer(class, ty);
        let handle = self.instructions.append(Inst {
            ty: Some(ptr),
            kind: InstKind::Variable { class, init: None },
            decorations: Vec::new(),
        });
        if class != spirv::StorageClass::Input && class != spirv::StorageClass::Output {
            self.globals.push(handle);
        }
        self.all_globals.push(handle);
        handle
    }

    /// Whether the block's last instruction is a terminator.
    pub fn block_terminated(&self, block: Handle<Inst>) -> bool {
        let body = match self.instructions[block].kind {
            InstKind::Block { ref body } => body,
            _ => return false,
        };
        match body.last() {
            Some(&inst) => matches!(
                self.instructions[inst].kind,
                InstKind::Branch { .. }
                    | InstKind::BranchConditional { .. }
                    | InstKind::Return { .. }
                    | InstKind::Discard
            ),
            None => false,
        }
    }
}
