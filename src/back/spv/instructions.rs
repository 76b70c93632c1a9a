use crate::back::spv::{helpers, Instruction};
use spirv::{Op, Word};

//
// Debug Instructions
//

pub(super) fn instruction_source(
    source_language: spirv::SourceLanguage,
    version: u32,
) -> Instruction {
    let mut instruction = Instruction::new(Op::Source);
    instruction.add_operand(source_language as u32);
    instruction.add_operands(helpers::bytes_to_words(&version.to_le_bytes()));
    instruction
}

pub(super) fn instruction_name(target_id: Word, name: &str) -> Instruction {
    let mut instruction = Instruction::new(Op::Name);
    instruction.add_operand(target_id);
    instruction.add_operands(helpers::string_to_words(name));
    instruction
}

//
// Annotation Instructions
//

pub(super) fn instruction_decorate(
    target_id: Word,
    decoration: spirv::Decoration,
    operands: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::Decorate);
    instruction.add_operand(target_id);
    instruction.add_operand(decoration as u32);

    for operand in operands {
        instruction.add_operand(*operand)
    }

    instruction
}

pub(super) fn instruction_member_decorate(
    target_id: Word,
    member_index: Word,
    decoration: spirv::Decoration,
    operands: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::MemberDecorate);
    instruction.add_operand(target_id);
    instruction.add_operand(member_index);
    instruction.add_operand(decoration as u32);

    for operand in operands {
        instruction.add_operand(*operand)
    }

    instruction
}

//
// Extension Instructions
//

pub(super) fn instruction_ext_inst_import(id: Word, name: &str) -> Instruction {
    let mut instruction = Instruction::new(Op::ExtInstImport);
    instruction.set_result(id);
    instruction.add_operands(helpers::string_to_words(name));
    instruction
}

pub(super) fn instruction_ext_inst(
    result_type_id: Word,
    id: Word,
    set_id: Word,
    op: spirv::GLOp,
    operand_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::ExtInst);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(set_id);
    instruction.add_operand(op as u32);

    for operand_id in operand_ids {
        instruction.add_operand(*operand_id);
    }

    instruction
}

//
// Mode-Setting Instructions
//

pub(super) fn instruction_memory_model(
    addressing_model: spirv::AddressingModel,
    memory_model: spirv::MemoryModel,
) -> Instruction {
    let mut instruction = Instruction::new(Op::MemoryModel);
    instruction.add_operand(addressing_model as u32);
    instruction.add_operand(memory_model as u32);
    instruction
}

pub(super) fn instruction_entry_point(
    execution_model: spirv::ExecutionModel,
    entry_point_id: Word,
    name: &str,
    interface_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::EntryPoint);
    instruction.add_operand(execution_model as u32);
    instruction.add_operand(entry_point_id);
    instruction.add_operands(helpers::string_to_words(name));

    for interface_id in interface_ids {
        instruction.add_operand(*interface_id);
    }

    instruction
}

pub(super) fn instruction_execution_mode(
    entry_point_id: Word,
    execution_mode: spirv::ExecutionMode,
    args: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::ExecutionMode);
    instruction.add_operand(entry_point_id);
    instruction.add_operand(execution_mode as u32);

    for arg in args {
        instruction.add_operand(*arg);
    }

    instruction
}

pub(super) fn instruction_capability(capability: spirv::Capability) -> Instruction {
    let mut instruction = Instruction::new(Op::Capability);
    instruction.add_operand(capability as u32);
    instruction
}

//
// Type-Declaration Instructions
//

pub(super) fn instruction_type_void(id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeVoid);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_type_bool(id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeBool);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_type_int(id: Word, width: Word, signed: bool) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeInt);
    instruction.set_result(id);
    instruction.add_operand(width);
    instruction.add_operand(signed as u32);
    instruction
}

pub(super) fn instruction_type_float(id: Word, width: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeFloat);
    instruction.set_result(id);
    instruction.add_operand(width);
    instruction
}

pub(super) fn instruction_type_vector(
    id: Word,
    component_type_id: Word,
    component_count: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeVector);
    instruction.set_result(id);
    instruction.add_operand(component_type_id);
    instruction.add_operand(component_count);
    instruction
}

pub(super) fn instruction_type_matrix(
    id: Word,
    column_type_id: Word,
    column_count: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeMatrix);
    instruction.set_result(id);
    instruction.add_operand(column_type_id);
    instruction.add_operand(column_count);
    instruction
}

pub(super) fn instruction_type_image(
    id: Word,
    sampled_type_id: Word,
    dim: spirv::Dim,
) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeImage);
    instruction.set_result(id);
    instruction.add_operand(sampled_type_id);
    instruction.add_operand(dim as u32);
    instruction.add_operand(0); // not a depth image
    instruction.add_operand(0); // not arrayed
    instruction.add_operand(0); // single-sampled
    instruction.add_operand(1); // used with a sampler
    instruction.add_operand(spirv::ImageFormat::Unknown as u32);
    instruction
}

pub(super) fn instruction_type_sampler(id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeSampler);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_type_sampled_image(id: Word, image_type_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeSampledImage);
    instruction.set_result(id);
    instruction.add_operand(image_type_id);
    instruction
}

pub(super) fn instruction_type_runtime_array(id: Word, element_type_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeRuntimeArray);
    instruction.set_result(id);
    instruction.add_operand(element_type_id);
    instruction
}

pub(super) fn instruction_type_struct(id: Word, member_ids: &[Word]) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeStruct);
    instruction.set_result(id);

    for member_id in member_ids {
        instruction.add_operand(*member_id)
    }

    instruction
}

pub(super) fn instruction_type_pointer(
    id: Word,
    storage_class: spirv::StorageClass,
    type_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::TypePointer);
    instruction.set_result(id);
    instruction.add_operand(storage_class as u32);
    instruction.add_operand(type_id);
    instruction
}

pub(super) fn instruction_type_function(
    id: Word,
    return_type_id: Word,
    parameter_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::TypeFunction);
    instruction.set_result(id);
    instruction.add_operand(return_type_id);

    for parameter_id in parameter_ids {
        instruction.add_operand(*parameter_id);
    }

    instruction
}

//
// Constant-Creation Instructions
//

pub(super) fn instruction_constant_true(result_type_id: Word, id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::ConstantTrue);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_constant_false(result_type_id: Word, id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::ConstantFalse);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_constant(result_type_id: Word, id: Word, values: &[Word]) -> Instruction {
    let mut instruction = Instruction::new(Op::Constant);
    instruction.set_type(result_type_id);
    instruction.set_result(id);

    for value in values {
        instruction.add_operand(*value);
    }

    instruction
}

//
// Memory Instructions
//

pub(super) fn instruction_variable(
    result_type_id: Word,
    id: Word,
    storage_class: spirv::StorageClass,
    initializer_id: Option<Word>,
) -> Instruction {
    let mut instruction = Instruction::new(Op::Variable);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(storage_class as u32);

    if let Some(initializer_id) = initializer_id {
        instruction.add_operand(initializer_id);
    }

    instruction
}

pub(super) fn instruction_load(result_type_id: Word, id: Word, pointer_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::Load);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(pointer_id);
    instruction
}

pub(super) fn instruction_store(pointer_id: Word, object_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::Store);
    instruction.add_operand(pointer_id);
    instruction.add_operand(object_id);
    instruction
}

pub(super) fn instruction_access_chain(
    result_type_id: Word,
    id: Word,
    base_id: Word,
    index_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::AccessChain);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(base_id);

    for index_id in index_ids {
        instruction.add_operand(*index_id);
    }

    instruction
}

//
// Function Instructions
//

pub(super) fn instruction_function(
    return_type_id: Word,
    id: Word,
    function_control: spirv::FunctionControl,
    function_type_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::Function);
    instruction.set_type(return_type_id);
    instruction.set_result(id);
    instruction.add_operand(function_control.bits());
    instruction.add_operand(function_type_id);
    instruction
}

pub(super) fn instruction_function_parameter(result_type_id: Word, id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::FunctionParameter);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_function_end() -> Instruction {
    Instruction::new(Op::FunctionEnd)
}

pub(super) fn instruction_function_call(
    result_type_id: Word,
    id: Word,
    function_id: Word,
    argument_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::FunctionCall);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(function_id);

    for argument_id in argument_ids {
        instruction.add_operand(*argument_id);
    }

    instruction
}

//
// Image Instructions
//

pub(super) fn instruction_sampled_image(
    result_type_id: Word,
    id: Word,
    image_id: Word,
    sampler_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::SampledImage);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(image_id);
    instruction.add_operand(sampler_id);
    instruction
}

pub(super) fn instruction_image_sample_implicit_lod(
    result_type_id: Word,
    id: Word,
    sampled_image_id: Word,
    coordinate_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::ImageSampleImplicitLod);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(sampled_image_id);
    instruction.add_operand(coordinate_id);
    instruction
}

//
// Composite Instructions
//

pub(super) fn instruction_composite_construct(
    result_type_id: Word,
    id: Word,
    constituent_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::CompositeConstruct);
    instruction.set_type(result_type_id);
    instruction.set_result(id);

    for constituent_id in constituent_ids {
        instruction.add_operand(*constituent_id);
    }

    instruction
}

pub(super) fn instruction_composite_extract(
    result_type_id: Word,
    id: Word,
    composite_id: Word,
    indices: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::CompositeExtract);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(composite_id);

    for index in indices {
        instruction.add_operand(*index);
    }

    instruction
}

pub(super) fn instruction_vector_shuffle(
    result_type_id: Word,
    id: Word,
    vector_1_id: Word,
    vector_2_id: Word,
    components: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(Op::VectorShuffle);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(vector_1_id);
    instruction.add_operand(vector_2_id);

    for component in components {
        instruction.add_operand(*component);
    }

    instruction
}

//
// Arithmetic, Atomic and Conversion Instructions
//
// These share the `type, result, operands...` layout, so a single pair
// of constructors parameterized by opcode covers all of them.
//

pub(super) fn instruction_unary(op: Op, result_type_id: Word, id: Word, value_id: Word) -> Instruction {
    let mut instruction = Instruction::new(op);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(value_id);
    instruction
}

pub(super) fn instruction_binary(
    op: Op,
    result_type_id: Word,
    id: Word,
    left_id: Word,
    right_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(op);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(left_id);
    instruction.add_operand(right_id);
    instruction
}

pub(super) fn instruction_atomic(
    op: Op,
    result_type_id: Word,
    id: Word,
    pointer_id: Word,
    operand_ids: &[Word],
) -> Instruction {
    let mut instruction = Instruction::new(op);
    instruction.set_type(result_type_id);
    instruction.set_result(id);
    instruction.add_operand(pointer_id);

    for operand_id in operand_ids {
        instruction.add_operand(*operand_id);
    }

    instruction
}

//
// Barrier Instructions
//

pub(super) fn instruction_control_barrier(
    execution_scope_id: Word,
    memory_scope_id: Word,
    semantics_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::ControlBarrier);
    instruction.add_operand(execution_scope_id);
    instruction.add_operand(memory_scope_id);
    instruction.add_operand(semantics_id);
    instruction
}

pub(super) fn instruction_memory_barrier(
    memory_scope_id: Word,
    semantics_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::MemoryBarrier);
    instruction.add_operand(memory_scope_id);
    instruction.add_operand(semantics_id);
    instruction
}

//
// Control-Flow Instructions
//

pub(super) fn instruction_label(id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::Label);
    instruction.set_result(id);
    instruction
}

pub(super) fn instruction_selection_merge(merge_block_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::SelectionMerge);
    instruction.add_operand(merge_block_id);
    instruction.add_operand(spirv::SelectionControl::NONE.bits());
    instruction
}

pub(super) fn instruction_loop_merge(
    merge_block_id: Word,
    continue_target_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::LoopMerge);
    instruction.add_operand(merge_block_id);
    instruction.add_operand(continue_target_id);
    instruction.add_operand(spirv::LoopControl::NONE.bits());
    instruction
}

pub(super) fn instruction_branch(target_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::Branch);
    instruction.add_operand(target_id);
    instruction
}

pub(super) fn instruction_branch_conditional(
    condition_id: Word,
    true_label_id: Word,
    false_label_id: Word,
) -> Instruction {
    let mut instruction = Instruction::new(Op::BranchConditional);
    instruction.add_operand(condition_id);
    instruction.add_operand(true_label_id);
    instruction.add_operand(false_label_id);
    instruction
}

pub(super) fn instruction_return() -> Instruction {
    Instruction::new(Op::Return)
}

pub(super) fn instruction_return_value(value_id: Word) -> Instruction {
    let mut instruction = Instruction::new(Op::ReturnValue);
    instruction.add_operand(value_id);
    instruction
}

pub(super) fn instruction_kill() -> Instruction {
    Instruction::new(Op::Kill)
}
