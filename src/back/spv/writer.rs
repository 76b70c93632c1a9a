//! Serialization of an IR module into the SPIR-V word stream.
//!
//! The emission order is fixed: header, `Capability`, the GLSL.std.450
//! import, `MemoryModel`, `OpEntryPoint`s with their execution modes,
//! `OpSource`, decorations (globals first, then types and their members),
//! type declarations, constants, module-scope variables and finally the
//! function bodies. Ids for functions, parameters, globals and blocks are
//! reserved up front so forward branches can be encoded; everything else
//! receives its id at the point of emission, and the id bound is patched
//! into the header last.

use super::{instructions::*, Error, IdGenerator, WriterFlags};
use crate::{
    arena::Handle,
    ir::{Inst, InstKind, Module, ScalarValue, Type, TypeInner},
    Decoration, ShaderStage,
};

use spirv::Word;

pub struct Writer {
    id_gen: IdGenerator,
    flags: WriterFlags,
    /// Result ids by instruction handle; zero means not yet assigned.
    ids: Vec<Word>,
    /// Ids by type handle, reserved in insertion order once all caching
    /// is complete.
    type_ids: Vec<Word>,
    /// Id of the imported GLSL.std.450 instruction set.
    ext_inst_id: Word,
}

/// Serialize a module, returning the word buffer.
pub fn write_vec(module: &Module) -> Result<Vec<u32>, Error> {
    let mut words = Vec::new();
    let mut writer = Writer::new(WriterFlags::empty());
    writer.write(module, &mut words)?;
    Ok(words)
}

impl Writer {
    pub fn new(flags: WriterFlags) -> Self {
        Writer {
            id_gen: IdGenerator::default(),
            flags,
            ids: Vec::new(),
            type_ids: Vec::new(),
            ext_inst_id: 0,
        }
    }

    fn assign(&mut self, inst: Handle<Inst>) -> Word {
        let id = self.id_gen.next();
        self.ids[inst.index()] = id;
        id
    }

    fn id_of(&self, inst: Handle<Inst>) -> Result<Word, Error> {
        match self.ids[inst.index()] {
            0 => Err(Error::UnassignedId),
            id => Ok(id),
        }
    }

    fn type_id(&self, ty: Handle<Type>) -> Result<Word, Error> {
        match self.type_ids[ty.index()] {
            0 => Err(Error::UnassignedId),
            id => Ok(id),
        }
    }

    fn result_type_id(&self, module: &Module, inst: Handle<Inst>) -> Result<Word, Error> {
        match module.instructions[inst].ty {
            Some(ty) => self.type_id(ty),
            None => Err(Error::Validation("instruction has no result type")),
        }
    }

    pub fn write(&mut self, module: &Module, words: &mut Vec<Word>) -> Result<(), Error> {
        self.ids = vec![0; module.instructions.len()];
        self.type_ids = vec![0; module.types.len()];
        self.ext_inst_id = self.id_gen.next();

        // Functions, parameters, globals and blocks are referenced before
        // their definitions are written, so their ids come first.
        for &function in &module.functions {
            self.assign(function);
            if let InstKind::Function { ref params, .. } = module.instructions[function].kind {
                for &param in params {
                    self.assign(param);
                }
            }
        }
        for &global in &module.all_globals {
            self.assign(global);
        }
        for &function in &module.functions {
            if let InstKind::Function { ref blocks, .. } = module.instructions[function].kind {
                for &block in blocks {
                    self.assign(block);
                }
            }
        }

        words.push(spirv::MAGIC_NUMBER);
        words.push(super::LANG_VERSION);
        words.push(super::GENERATOR_MAGIC);
        let bound_index = words.len();
        words.push(0); // id bound, patched at the end
        words.push(0);

        instruction_capability(spirv::Capability::Shader).to_words(words);
        instruction_ext_inst_import(self.ext_inst_id, "GLSL.std.450").to_words(words);
        instruction_memory_model(
            spirv::AddressingModel::Logical,
            spirv::MemoryModel::GLSL450,
        )
        .to_words(words);

        for entry_point in &module.entry_points {
            let function_id = self.id_of(entry_point.function)?;
            let mut interface_ids = Vec::with_capacity(entry_point.interface.len());
            for &var in &entry_point.interface {
                interface_ids.push(self.id_of(var)?);
            }
            instruction_entry_point(
                entry_point.stage.execution_model(),
                function_id,
                &entry_point.name,
                &interface_ids,
            )
            .to_words(words);

            match entry_point.stage {
                ShaderStage::Fragment => {
                    instruction_execution_mode(
                        function_id,
                        spirv::ExecutionMode::OriginUpperLeft,
                        &[],
                    )
                    .to_words(words);
                }
                ShaderStage::Compute => {
                    instruction_execution_mode(
                        function_id,
                        spirv::ExecutionMode::LocalSize,
                        &entry_point.workgroup_size,
                    )
                    .to_words(words);
                }
                ShaderStage::Vertex => {}
            }
        }

        instruction_source(spirv::SourceLanguage::HLSL, 660).to_words(words);

        // Ids for every cached type, in insertion order.
        for (ty, _) in module.types.iter() {
            self.type_ids[ty.index()] = self.id_gen.next();
        }

        if self.flags.contains(WriterFlags::DEBUG) {
            for entry_point in &module.entry_points {
                instruction_name(self.id_of(entry_point.function)?, &entry_point.name)
                    .to_words(words);
            }
            for (handle, ty) in module.types.iter() {
                if let TypeInner::Struct { ref name, .. } = ty.inner {
                    instruction_name(self.type_id(handle)?, name).to_words(words);
                }
            }
        }

        self.write_decorations(module, words)?;
        self.write_types(module, words)?;
        self.write_constants(module, words)?;

        for &global in &module.all_globals {
            let id = self.id_of(global)?;
            let type_id = self.result_type_id(module, global)?;
            if let InstKind::Variable { class, .. } = module.instructions[global].kind {
                instruction_variable(type_id, id, class, None).to_words(words);
            }
        }

        for &function in &module.functions {
            self.write_function(module, function, words)?;
        }

        words[bound_index] = self.id_gen.bound();
        log::debug!(
            "wrote {} words, id bound {}",
            words.len(),
            words[bound_index]
        );
        Ok(())
    }

    fn decoration_operands(decoration: &Decoration) -> Vec<Word> {
        match decoration.operand {
            Some(operand) => vec![operand],
            None => Vec::new(),
        }
    }

    fn write_decorations(&mut self, module: &Module, words: &mut Vec<Word>) -> Result<(), Error> {
        for &global in &module.all_globals {
            let id = self.id_of(global)?;
            for decoration in &module.instructions[global].decorations {
                instruction_decorate(id, decoration.kind, &Self::decoration_operands(decoration))
                    .to_words(words);
            }
        }

        for (handle, ty) in module.types.iter() {
            let id = self.type_id(handle)?;
            for member_decoration in &ty.member_decorations {
                let operands = match member_decoration.operand {
                    Some(operand) => vec![operand],
                    None => Vec::new(),
                };
                instruction_member_decorate(
                    id,
                    member_decoration.member,
                    member_decoration.kind,
                    &operands,
                )
                .to_words(words);
            }
            for decoration in &ty.decorations {
                instruction_decorate(id, decoration.kind, &Self::decoration_operands(decoration))
                    .to_words(words);
            }
        }
        Ok(())
    }

    fn write_types(&mut self, module: &Module, words: &mut Vec<Word>) -> Result<(), Error> {
        const BITS_PER_BYTE: u32 = 8;

        for (handle, ty) in module.types.iter() {
            let id = self.type_id(handle)?;
            let instruction = match ty.inner {
                TypeInner::Void => instruction_type_void(id),
                TypeInner::Bool => instruction_type_bool(id),
                TypeInner::Float { width } => {
                    instruction_type_float(id, width as u32 * BITS_PER_BYTE)
                }
                TypeInner::Int { width, signed } => {
                    instruction_type_int(id, width as u32 * BITS_PER_BYTE, signed)
                }
                TypeInner::Vector { elem, size } => {
                    instruction_type_vector(id, self.type_id(elem)?, size)
                }
                TypeInner::Matrix { columns, column } => {
                    instruction_type_matrix(id, self.type_id(column)?, columns)
                }
                TypeInner::RuntimeArray { base } => {
                    instruction_type_runtime_array(id, self.type_id(base)?)
                }
                TypeInner::Pointer { class, base } => {
                    instruction_type_pointer(id, class, self.type_id(base)?)
                }
                TypeInner::Function { ret, ref params } => {
                    let mut param_ids = Vec::with_capacity(params.len());
                    for &param in params {
                        param_ids.push(self.type_id(param)?);
                    }
                    instruction_type_function(id, self.type_id(ret)?, &param_ids)
                }
                TypeInner::Struct { ref members, .. } => {
                    let mut member_ids = Vec::with_capacity(members.len());
                    for &member in members {
                        member_ids.push(self.type_id(member)?);
                    }
                    instruction_type_struct(id, &member_ids)
                }
                TypeInner::Sampler => instruction_type_sampler(id),
                TypeInner::Image { sampled, dim } => {
                    instruction_type_image(id, self.type_id(sampled)?, dim)
                }
                TypeInner::SampledImage { image } => {
                    instruction_type_sampled_image(id, self.type_id(image)?)
                }
            };
            instruction.to_words(words);
        }
        Ok(())
    }

    fn write_constants(&mut self, module: &Module, words: &mut Vec<Word>) -> Result<(), Error> {
        for &constant in &module.constants {
            let ty = match module.instructions[constant].ty {
                Some(ty) => ty,
                None => return Err(Error::Validation("constant has no type")),
            };
            let type_id = self.type_id(ty)?;
            let id = self.assign(constant);
            let value = match module.instructions[constant].kind {
                InstKind::Constant { value } => value,
                _ => return Err(Error::Validation("non-constant in the constant list")),
            };

            let instruction = match value {
                ScalarValue::Bool(true) => instruction_constant_true(type_id, id),
                ScalarValue::Bool(false) => instruction_constant_false(type_id, id),
                _ => {
                    let width = match module.types[ty].inner {
                        TypeInner::Float { width } | TypeInner::Int { width, .. } => width,
                        _ => return Err(Error::Validation("constant of a non-scalar type")),
                    };
                    let bits = match value {
                        ScalarValue::Float(v) if width == 4 => (v as f32).to_bits() as u64,
                        ScalarValue::Float(v) => v.to_bits(),
                        ScalarValue::Sint(v) => v as u64,
                        ScalarValue::Uint(v) => v,
                        ScalarValue::Bool(_) => 0,
                    };
                    if width > 4 {
                        instruction_constant(type_id, id, &[bits as u32, (bits >> 32) as u32])
                    } else {
                        instruction_constant(type_id, id, &[bits as u32])
                    }
                }
            };
            instruction.to_words(words);
        }
        Ok(())
    }

    fn write_function(
        &mut self,
        module: &Module,
        function: Handle<Inst>,
        words: &mut Vec<Word>,
    ) -> Result<(), Error> {
        let function_type = match module.instructions[function].ty {
            Some(ty) => ty,
            None => return Err(Error::Validation("function has no type")),
        };
        let return_type = match module.types[function_type].inner {
            TypeInner::Function { ret, .. } => ret,
            _ => return Err(Error::Validation("function has a non-function type")),
        };

        instruction_function(
            self.type_id(return_type)?,
            self.id_of(function)?,
            spirv::FunctionControl::NONE,
            self.type_id(function_type)?,
        )
        .to_words(words);

        let (params, blocks) = match module.instructions[function].kind {
            InstKind::Function {
                ref params,
                ref blocks,
            } => (params.clone(), blocks.clone()),
            _ => return Err(Error::Validation("non-function in the function list")),
        };

        for &param in &params {
            let type_id = self.result_type_id(module, param)?;
            instruction_function_parameter(type_id, self.id_of(param)?).to_words(words);
        }

        for &block in &blocks {
            self.write_block(module, block, words)?;
        }

        instruction_function_end().to_words(words);
        Ok(())
    }

    fn write_block(
        &mut self,
        module: &Module,
        block: Handle<Inst>,
        words: &mut Vec<Word>,
    ) -> Result<(), Error> {
        if !module.block_terminated(block) {
            return Err(Error::MissingTerminator);
        }

        instruction_label(self.id_of(block)?).to_words(words);

        let body = match module.instructions[block].kind {
            InstKind::Block { ref body } => body.clone(),
            _ => return Err(Error::Validation("non-block in a function body")),
        };

        for inst in body {
            self.write_inst(module, inst, words)?;
        }
        Ok(())
    }

    /// Encode a single body instruction, assigning its result id.
    /// Redundant casts expand to nothing; loop and selection headers
    /// expand to a merge instruction followed by the branch.
    fn write_inst(
        &mut self,
        module: &Module,
        inst: Handle<Inst>,
        words: &mut Vec<Word>,
    ) -> Result<(), Error> {
        let instruction = match module.instructions[inst].kind {
            InstKind::Variable { class, init } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                let init_id = match init {
                    Some(init) => Some(self.id_of(init)?),
                    None => None,
                };
                instruction_variable(type_id, id, class, init_id)
            }
            InstKind::Return { value } => match value {
                Some(value) => instruction_return_value(self.id_of(value)?),
                None => instruction_return(),
            },
            InstKind::Discard => instruction_kill(),
            InstKind::Branch {
                target,
                merge,
                continuing,
            } => {
                // A loop header declares its merge and continue targets
                // just before branching into the body.
                if let (Some(merge), Some(continuing)) = (merge, continuing) {
                    instruction_loop_merge(self.id_of(merge)?, self.id_of(continuing)?)
                        .to_words(words);
                }
                instruction_branch(self.id_of(target)?)
            }
            InstKind::BranchConditional {
                condition,
                accept,
                reject,
                merge,
                continuing,
            } => {
                match (merge, continuing) {
                    (Some(merge), Some(continuing)) => {
                        instruction_loop_merge(self.id_of(merge)?, self.id_of(continuing)?)
                            .to_words(words);
                    }
                    (Some(merge), None) => {
                        instruction_selection_merge(self.id_of(merge)?).to_words(words);
                    }
                    _ => {}
                }
                instruction_branch_conditional(
                    self.id_of(condition)?,
                    self.id_of(accept)?,
                    self.id_of(reject)?,
                )
            }
            InstKind::Load { pointer } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_load(type_id, id, self.id_of(pointer)?)
            }
            InstKind::Store { pointer, value } => {
                instruction_store(self.id_of(pointer)?, self.id_of(value)?)
            }
            InstKind::AccessChain { base, ref indices } => {
                let type_id = self.result_type_id(module, inst)?;
                let mut index_ids = Vec::with_capacity(indices.len());
                for &index in indices {
                    index_ids.push(self.id_of(index)?);
                }
                let id = self.assign(inst);
                instruction_access_chain(type_id, id, self.id_of(base)?, &index_ids)
            }
            InstKind::Call {
                function,
                ref arguments,
            } => {
                let type_id = self.result_type_id(module, inst)?;
                let mut argument_ids = Vec::with_capacity(arguments.len());
                for &argument in arguments {
                    argument_ids.push(self.id_of(argument)?);
                }
                let id = self.assign(inst);
                instruction_function_call(type_id, id, self.id_of(function)?, &argument_ids)
            }
            InstKind::ExtInst { op, ref arguments } => {
                let type_id = self.result_type_id(module, inst)?;
                let mut argument_ids = Vec::with_capacity(arguments.len());
                for &argument in arguments {
                    argument_ids.push(self.id_of(argument)?);
                }
                let id = self.assign(inst);
                instruction_ext_inst(type_id, id, self.ext_inst_id, op, &argument_ids)
            }
            InstKind::Barrier {
                execution_scope,
                memory_scope,
                semantics,
            } => match execution_scope {
                Some(execution_scope) => instruction_control_barrier(
                    self.id_of(execution_scope)?,
                    self.id_of(memory_scope)?,
                    self.id_of(semantics)?,
                ),
                None => instruction_memory_barrier(
                    self.id_of(memory_scope)?,
                    self.id_of(semantics)?,
                ),
            },
            InstKind::Cast {
                op,
                value,
                redundant,
            } => {
                if redundant {
                    // The cast is a no-op; forward the operand's id.
                    self.ids[inst.index()] = self.id_of(value)?;
                    return Ok(());
                }
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_unary(op, type_id, id, self.id_of(value)?)
            }
            InstKind::CompositeConstruct { ref components } => {
                let type_id = self.result_type_id(module, inst)?;
                let mut component_ids = Vec::with_capacity(components.len());
                for &component in components {
                    component_ids.push(self.id_of(component)?);
                }
                let id = self.assign(inst);
                instruction_composite_construct(type_id, id, &component_ids)
            }
            InstKind::CompositeExtract { value, ref indices } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_composite_extract(type_id, id, self.id_of(value)?, indices)
            }
            InstKind::VectorShuffle {
                left,
                right,
                ref pattern,
            } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_vector_shuffle(
                    type_id,
                    id,
                    self.id_of(left)?,
                    self.id_of(right)?,
                    pattern,
                )
            }
            InstKind::SampledImage { image, sampler } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_sampled_image(type_id, id, self.id_of(image)?, self.id_of(sampler)?)
            }
            InstKind::SampleImplicitLod {
                sampled_image,
                coordinate,
            } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_image_sample_implicit_lod(
                    type_id,
                    id,
                    self.id_of(sampled_image)?,
                    self.id_of(coordinate)?,
                )
            }
            InstKind::Atomic {
                op,
                pointer,
                scope,
                ref semantics,
                ref operands,
            } => {
                let type_id = self.result_type_id(module, inst)?;
                let mut operand_ids = vec![self.id_of(scope)?];
                for &semantic in semantics {
                    operand_ids.push(self.id_of(semantic)?);
                }
                for &operand in operands {
                    operand_ids.push(self.id_of(operand)?);
                }
                let id = self.assign(inst);
                instruction_atomic(op, type_id, id, self.id_of(pointer)?, &operand_ids)
            }
            InstKind::Unary { op, expr } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_unary(op, type_id, id, self.id_of(expr)?)
            }
            InstKind::Binary { op, left, right } => {
                let type_id = self.result_type_id(module, inst)?;
                let id = self.assign(inst);
                instruction_binary(op, type_id, id, self.id_of(left)?, self.id_of(right)?)
            }
            InstKind::Function { .. }
            | InstKind::Parameter { .. }
            | InstKind::Block { .. }
            | InstKind::Constant { .. } => {
                return Err(Error::Validation("declaration inside a basic block"))
            }
        };

        instruction.to_words(words);
        Ok(())
    }
}
