//! End-to-end compilation scenarios, asserting on the emitted word
//! stream.

use basalt::{compile, ShaderStage};
use spirv::Op;

/// Split a module into `(opcode, operands)` pairs, skipping the header.
fn instructions(words: &[u32]) -> Vec<(u32, &[u32])> {
    let mut result = Vec::new();
    let mut pos = 5;
    while pos < words.len() {
        let word = words[pos];
        let word_count = (word >> 16) as usize;
        let opcode = word & 0xffff;
        assert!(word_count > 0, "zero-length instruction at {}", pos);
        assert!(pos + word_count <= words.len(), "truncated instruction");
        result.push((opcode, &words[pos + 1..pos + word_count]));
        pos += word_count;
    }
    result
}

fn ops_of(words: &[u32], op: Op) -> Vec<Vec<u32>> {
    instructions(words)
        .into_iter()
        .filter(|&(opcode, _)| opcode == op as u32)
        .map(|(_, operands)| operands.to_vec())
        .collect()
}

fn count_op(words: &[u32], op: Op) -> usize {
    ops_of(words, op).len()
}

/// Decorations of the form `OpDecorate target kind value`.
fn decorations(words: &[u32], kind: spirv::Decoration) -> Vec<Vec<u32>> {
    ops_of(words, Op::Decorate)
        .into_iter()
        .filter(|operands| operands.get(1) == Some(&(kind as u32)))
        .collect()
}

#[test]
fn header_and_idempotence() {
    let _ = env_logger::builder().is_test(true).try_init();

    let source = "float4 main(float3 p : POSITION) : SV_Position { return float4(p, 1.0); }";
    let first = compile(source, "test.hlsl", "main", ShaderStage::Vertex).unwrap();
    let second = compile(source, "test.hlsl", "main", ShaderStage::Vertex).unwrap();

    assert_eq!(first[0], spirv::MAGIC_NUMBER);
    assert_eq!(first[1], 0x0001_0000);
    assert_eq!(first[2], u32::from_le_bytes(*b"TINY"));
    assert_eq!(first[4], 0);

    // The id bound is one past the largest assigned id.
    let max_id = first[3];
    assert!(max_id > 1);

    // Compiling twice yields byte-identical output.
    assert_eq!(first, second);
}

#[test]
fn trivial_vertex() {
    let source = "float4 main(float3 p : POSITION) : SV_Position { return float4(p, 1.0); }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Vertex).unwrap();

    let entry_points = ops_of(&words, Op::EntryPoint);
    assert_eq!(entry_points.len(), 1);
    assert_eq!(
        entry_points[0][0],
        spirv::ExecutionModel::Vertex as u32,
        "vertex execution model"
    );
    // "main\0" padded: one word of name, then two interface variables.
    let interface = &entry_points[0][2 + 2..];
    assert_eq!(interface.len(), 2);

    // Location 0 input, Position builtin output.
    let locations = decorations(&words, spirv::Decoration::Location);
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0][2], 0);
    let builtins = decorations(&words, spirv::Decoration::BuiltIn);
    assert_eq!(builtins.len(), 1);
    assert_eq!(builtins[0][2], spirv::BuiltIn::Position as u32);

    assert!(count_op(&words, Op::CompositeConstruct) >= 1);
    assert!(count_op(&words, Op::ReturnValue) >= 1);
    assert_eq!(count_op(&words, Op::Kill), 0);

    // Exactly one vertex entry: no execution modes needed.
    assert_eq!(count_op(&words, Op::ExecutionMode), 0);
}

#[test]
fn fragment_texture_sample() {
    let source = "Texture2D tex;\n\
                  SamplerState s;\n\
                  float4 main(float2 uv : TEXCOORD0) : SV_Target { return tex.Sample(s, uv); }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    assert_eq!(count_op(&words, Op::TypeImage), 1);
    assert_eq!(count_op(&words, Op::TypeSampler), 1);
    assert_eq!(count_op(&words, Op::SampledImage), 1);
    assert_eq!(count_op(&words, Op::ImageSampleImplicitLod), 1);

    // set 0, bindings 0 and 1.
    let sets = decorations(&words, spirv::Decoration::DescriptorSet);
    assert_eq!(sets.len(), 2);
    assert!(sets.iter().all(|operands| operands[2] == 0));
    let mut bindings: Vec<u32> = decorations(&words, spirv::Decoration::Binding)
        .into_iter()
        .map(|operands| operands[2])
        .collect();
    bindings.sort_unstable();
    assert_eq!(bindings, vec![0, 1]);

    // Location 0 input and location 0 output.
    let locations = decorations(&words, spirv::Decoration::Location);
    assert_eq!(locations.len(), 2);
    assert!(locations.iter().all(|operands| operands[2] == 0));

    let modes = ops_of(&words, Op::ExecutionMode);
    assert_eq!(modes.len(), 1);
    assert_eq!(modes[0][1], spirv::ExecutionMode::OriginUpperLeft as u32);
}

#[test]
fn compute_atomic() {
    let source = "RWStructuredBuffer<uint> buf;\n\
                  [numthreads(64, 1, 1)]\n\
                  void main(uint3 id : SV_DispatchThreadID) { InterlockedAdd(buf[0], 1); }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Compute).unwrap();

    let modes = ops_of(&words, Op::ExecutionMode);
    assert_eq!(modes.len(), 1);
    assert_eq!(modes[0][1], spirv::ExecutionMode::LocalSize as u32);
    assert_eq!(&modes[0][2..], &[64, 1, 1]);

    let builtins = decorations(&words, spirv::Decoration::BuiltIn);
    assert_eq!(builtins.len(), 1);
    assert_eq!(builtins[0][2], spirv::BuiltIn::GlobalInvocationId as u32);

    // The atomic takes Device scope and relaxed semantics: both are
    // constants, and the scope constant holds the Device value.
    let atomics = ops_of(&words, Op::AtomicIAdd);
    assert_eq!(atomics.len(), 1);
    let scope_id = atomics[0][3];
    let device_constants: Vec<u32> = ops_of(&words, Op::Constant)
        .into_iter()
        .filter(|operands| operands[2] == spirv::Scope::Device as u32)
        .map(|operands| operands[1])
        .collect();
    assert!(device_constants.contains(&scope_id));

    // The buffer wrapper: BufferBlock struct holding a decorated runtime
    // array.
    assert_eq!(count_op(&words, Op::TypeRuntimeArray), 1);
    let strides = decorations(&words, spirv::Decoration::ArrayStride);
    assert_eq!(strides.len(), 1);
    assert_eq!(strides[0][2], 4);
    assert_eq!(decorations(&words, spirv::Decoration::BufferBlock).len(), 1);
}

#[test]
fn loop_merge_precedes_header_branch() {
    let source = "StructuredBuffer<float> a;\n\
                  static const int N = 4;\n\
                  float main() : SV_Target {\n\
                      float sum = 0.0;\n\
                      for (int i = 0; i < N; ++i) { sum += a[i]; }\n\
                      return sum;\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    let stream = instructions(&words);
    let mut loop_merges = 0;
    for (index, &(opcode, operands)) in stream.iter().enumerate() {
        if opcode == Op::LoopMerge as u32 {
            loop_merges += 1;
            let (next_op, _) = stream[index + 1];
            assert!(
                next_op == Op::BranchConditional as u32 || next_op == Op::Branch as u32,
                "loop merge must immediately precede the header branch"
            );
            // Merge and continue targets must be real labels.
            let labels: Vec<u32> = ops_of(&words, Op::Label)
                .into_iter()
                .map(|operands| operands[0])
                .collect();
            assert!(labels.contains(&operands[0]));
            assert!(labels.contains(&operands[1]));
        }
    }
    assert_eq!(loop_merges, 1);
}

#[test]
fn every_block_ends_in_a_terminator() {
    let source = "float main(float x : A) : SV_Target {\n\
                      float r = 0.0;\n\
                      if (x > 0.5) { r = 1.0; } else { r = 2.0; }\n\
                      while (r > 3.0) { r -= 1.0; if (r > 10.0) break; }\n\
                      return r;\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    let terminators = [
        Op::Branch as u32,
        Op::BranchConditional as u32,
        Op::Return as u32,
        Op::ReturnValue as u32,
        Op::Kill as u32,
    ];

    let stream = instructions(&words);
    for (index, &(opcode, _)) in stream.iter().enumerate() {
        if opcode == Op::Label as u32 {
            // Walk to the next label or function end; the instruction
            // right before it must be a terminator.
            let mut last = opcode;
            for &(next, _) in &stream[index + 1..] {
                if next == Op::Label as u32 || next == Op::FunctionEnd as u32 {
                    break;
                }
                last = next;
            }
            assert!(
                terminators.contains(&last),
                "block does not end in a terminator: {}",
                last
            );
        }
    }

    assert!(count_op(&words, Op::SelectionMerge) >= 1);
    assert!(count_op(&words, Op::LoopMerge) >= 1);
}

#[test]
fn swizzle_assignment_stores_per_component() {
    let source = "float4 main() : SV_Target {\n\
                      float4 v = float4(0.0, 0.0, 0.0, 0.0);\n\
                      v.xz = float2(1.0, 2.0);\n\
                      return v;\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    // One store for the initializer, two for the swizzle components, one
    // for the stage output.
    assert_eq!(count_op(&words, Op::Store), 4);
    assert!(count_op(&words, Op::AccessChain) >= 2);
    assert_eq!(count_op(&words, Op::CompositeExtract), 2);
}

#[test]
fn repeated_swizzle_assignment_is_rejected() {
    let source = "float4 main() : SV_Target {\n\
                      float4 v = float4(0.0, 0.0, 0.0, 0.0);\n\
                      v.xx = float2(1.0, 2.0);\n\
                      return v;\n\
                  }";
    let diagnostics = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap_err();
    assert!(diagnostics
        .iter()
        .any(|d| d.message.contains("not assignable")));
}

#[test]
fn uniform_buffer_layout() {
    let source = "cbuffer C { float4 a; float b; float4 c; };\n\
                  float4 main() : SV_Target { return a + c; }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    let mut offsets: Vec<(u32, u32)> = ops_of(&words, Op::MemberDecorate)
        .into_iter()
        .filter(|operands| operands[2] == spirv::Decoration::Offset as u32)
        .map(|operands| (operands[1], operands[3]))
        .collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![(0, 0), (1, 16), (2, 32)]);

    assert_eq!(decorations(&words, spirv::Decoration::Block).len(), 1);
    // Block and BufferBlock take no extra operand.
    for operands in ops_of(&words, Op::Decorate) {
        if operands[1] == spirv::Decoration::Block as u32 {
            assert_eq!(operands.len(), 2);
        }
    }
}

#[test]
fn unique_result_ids_and_bound() {
    let source = "float4 main(float3 p : POSITION) : SV_Position { return float4(p, 1.0); }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Vertex).unwrap();

    // Collect result ids: for simplicity, check via the declared bound.
    let bound = words[3];
    let mut seen = vec![false; bound as usize];
    for (opcode, operands) in instructions(&words) {
        // Result-id positions vary; check the two common layouts.
        let result = if opcode == Op::Label as u32
            || opcode == Op::ExtInstImport as u32
            || opcode == Op::TypeVoid as u32
        {
            operands.get(0)
        } else {
            None
        };
        if let Some(&id) = result {
            assert!(id < bound, "id {} exceeds the bound {}", id, bound);
            assert!(!seen[id as usize], "duplicate id {}", id);
            seen[id as usize] = true;
        }
    }
}

#[test]
fn missing_entry_point_is_reported() {
    let diagnostics =
        compile("void helper() { }", "test.hlsl", "main", ShaderStage::Vertex).unwrap_err();
    assert!(!diagnostics.is_empty());
    assert!(diagnostics[0].message.contains("entry point"));
}

#[test]
fn diagnostics_carry_locations() {
    let source = "float4 main() : SV_Target {\n    return undefined_name;\n}";
    let diagnostics = compile(source, "shader.hlsl", "main", ShaderStage::Fragment).unwrap_err();
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.path, "shader.hlsl");
    assert_eq!(diagnostic.line, 2);
    assert!(diagnostic.message.contains("undefined_name"));
}

#[test]
fn out_parameter_entry_point() {
    let source = "void main(float3 p : POSITION, out float4 pos : SV_Position) {\n\
                      pos = float4(p, 1.0);\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Vertex).unwrap();

    let builtins = decorations(&words, spirv::Decoration::BuiltIn);
    assert_eq!(builtins.len(), 1);
    assert_eq!(builtins[0][2], spirv::BuiltIn::Position as u32);
    // The wrapper passes the out parameter by pointer and copies it to
    // the stage output afterwards.
    assert!(count_op(&words, Op::FunctionCall) >= 1);
}

#[test]
fn struct_io_vertex() {
    let source = "struct VsOut {\n\
                      float4 pos : SV_Position;\n\
                      float2 uv : TEXCOORD0;\n\
                  };\n\
                  VsOut main(float3 p : POSITION, float2 uv : TEXCOORD0) {\n\
                      VsOut result;\n\
                      result.pos = float4(p, 1.0);\n\
                      result.uv = uv;\n\
                      return result;\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Vertex).unwrap();

    // Two inputs plus one varying output, and the Position builtin.
    let locations = decorations(&words, spirv::Decoration::Location);
    assert_eq!(locations.len(), 3);
    let builtins = decorations(&words, spirv::Decoration::BuiltIn);
    assert_eq!(builtins.len(), 1);

    // The wrapper extracts both members of the returned struct.
    assert!(count_op(&words, Op::CompositeExtract) >= 2);

    let entry_points = ops_of(&words, Op::EntryPoint);
    let interface = &entry_points[0][2 + 2..];
    assert_eq!(interface.len(), 4);
}

#[test]
fn group_shared_barrier() {
    let source = "groupshared uint counter;\n\
                  [numthreads(8, 8, 1)]\n\
                  void main(uint3 id : SV_DispatchThreadID) {\n\
                      InterlockedAdd(counter, 1);\n\
                      GroupMemoryBarrierWithGroupSync();\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Compute).unwrap();

    assert_eq!(count_op(&words, Op::ControlBarrier), 1);
    assert_eq!(count_op(&words, Op::AtomicIAdd), 1);

    // The groupshared variable lives in Workgroup storage.
    let workgroup_vars = ops_of(&words, Op::Variable)
        .into_iter()
        .filter(|operands| operands[2] == spirv::StorageClass::Workgroup as u32)
        .count();
    assert_eq!(workgroup_vars, 1);
}

#[test]
fn function_calls_and_intrinsics() {
    let source = "float3 shade(float3 n, float3 l) {\n\
                      return dot(n, l) * float3(1.0, 1.0, 1.0);\n\
                  }\n\
                  float4 main(float3 n : NORMAL) : SV_Target {\n\
                      float3 lit = shade(normalize(n), float3(0.0, 1.0, 0.0));\n\
                      return float4(lit, 1.0);\n\
                  }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    assert!(count_op(&words, Op::FunctionCall) >= 1);
    assert_eq!(count_op(&words, Op::Dot), 1);
    // normalize() goes through the GLSL.std.450 set.
    let ext: Vec<Vec<u32>> = ops_of(&words, Op::ExtInst);
    assert!(ext
        .iter()
        .any(|operands| operands[3] == spirv::GLOp::Normalize as u32));
    // Both functions are emitted.
    assert_eq!(count_op(&words, Op::Function), 3);
}

#[test]
fn uncalled_functions_are_not_emitted() {
    let source = "float unused(float x) { return x * 2.0; }\n\
                  float4 main() : SV_Target { return float4(0.0, 0.0, 0.0, 0.0); }";
    let words = compile(source, "test.hlsl", "main", ShaderStage::Fragment).unwrap();

    // Only the user entry and its wrapper remain.
    assert_eq!(count_op(&words, Op::Function), 2);
}
