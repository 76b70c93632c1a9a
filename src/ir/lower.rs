//! Lowering of the analyzed AST into the IR.
//!
//! The builder keeps a "current block" cursor and two stacks for the
//! innermost `continue` and `break` targets. Every user variable becomes a
//! `Function`-class variable allocated in its function's entry block, so
//! all uses go through the same load/store discipline; an expression value
//! is an lvalue exactly when it is a variable, an access chain, or a
//! by-reference parameter.

use super::{EntryPoint, Inst, InstKind, Module, ScalarValue, Type, TypeInner};
use crate::front::hlsl::{
    ast::{self, BinaryOp, DeclKind, ExprKind, IoOrigin, Literal, StmtKind, UnaryOp},
    intrinsics::{BarrierScope, Intrinsic},
    layout,
};
use crate::{
    arena::Handle,
    Decoration, Diagnostics, FastHashMap, Location, MemberDecoration, ScalarKind,
};

struct Lowerer<'a> {
    unit: &'a ast::TranslationUnit,
    module: Module,
    diagnostics: &'a mut Diagnostics,

    type_map: FastHashMap<Handle<ast::Type>, Handle<Type>>,
    decl_values: FastHashMap<Handle<ast::Decl>, Handle<Inst>>,

    current_function: Option<Handle<Inst>>,
    current_block: Option<Handle<Inst>>,
    continue_stack: Vec<Handle<Inst>>,
    break_stack: Vec<Handle<Inst>>,

    /// Supplies names for synthesized buffer wrapper structs.
    counter: u32,
}

/// Lower an analyzed translation unit into an IR module.
///
/// Expects an error-free analysis; anything that contradicts the
/// analyzer's invariants is reported as an internal compiler error.
pub fn lower(unit: &ast::TranslationUnit, diagnostics: &mut Diagnostics) -> Module {
    let mut lowerer = Lowerer {
        unit,
        module: Module::new(),
        diagnostics,
        type_map: FastHashMap::default(),
        decl_values: FastHashMap::default(),
        current_function: None,
        current_block: None,
        continue_stack: Vec::new(),
        break_stack: Vec::new(),
        counter: 0,
    };
    lowerer.run();
    lowerer.module
}

impl<'a> Lowerer<'a> {
    fn run(&mut self) {
        // Declare functions, globals and constants first so that bodies
        // can reference them in any order.
        for &decl in &self.unit.globals {
            match self.unit.decls[decl].kind {
                DeclKind::Function(ref function) if function.called => {
                    self.declare_function(decl)
                }
                DeclKind::Var(_) => self.declare_global(decl),
                DeclKind::Const(_) => self.lower_const(decl),
                _ => {}
            }
        }

        let io_vars = match self.unit.entry_point {
            Some(ref entry) => {
                let inputs = self.declare_stage_io(&entry.inputs, spirv::StorageClass::Input);
                let outputs = self.declare_stage_io(&entry.outputs, spirv::StorageClass::Output);
                Some((inputs, outputs))
            }
            None => None,
        };

        for &decl in &self.unit.globals {
            if let DeclKind::Function(ref function) = self.unit.decls[decl].kind {
                if function.called {
                    self.build_function(decl);
                }
            }
        }

        if let Some((inputs, outputs)) = io_vars {
            self.build_entry_wrapper(inputs, outputs);
        }
    }

    //
    // Infrastructure
    //

    fn internal(&mut self, location: Location) {
        self.diagnostics
            .add(location, "internal compiler error".to_string());
    }

    /// Append an instruction to the current block.
    fn push(&mut self, ty: Option<Handle<Type>>, kind: InstKind) -> Handle<Inst> {
        let inst = self.module.instructions.append(Inst {
            ty,
            kind,
            decorations: Vec::new(),
        });
        if let Some(block) = self.current_block {
            if let InstKind::Block { ref mut body } = self.module.instructions.get_mut(block).kind
            {
                body.push(inst);
            }
        }
        inst
    }

    fn position_at_end(&mut self, block: Handle<Inst>) {
        self.current_block = Some(block);
    }

    fn attach(&mut self, block: Handle<Inst>) {
        if let Some(function) = self.current_function {
            self.module.attach_block(function, block);
        }
    }

    fn current_terminated(&self) -> bool {
        match self.current_block {
            Some(block) => self.module.block_terminated(block),
            None => true,
        }
    }

    fn is_lvalue(&self, value: Handle<Inst>) -> bool {
        match self.module.instructions[value].kind {
            InstKind::Variable { .. } | InstKind::AccessChain { .. } => true,
            InstKind::Parameter { by_reference } => by_reference,
            _ => false,
        }
    }

    /// The identity on rvalues; emits a `Load` for lvalues.
    fn load_val(&mut self, value: Handle<Inst>) -> Handle<Inst> {
        if self.is_lvalue(value) {
            let pointee = self
                .module
                .instructions[value]
                .ty
                .and_then(|ty| self.module.pointer_base(ty));
            self.push(pointee, InstKind::Load { pointer: value })
        } else {
            value
        }
    }

    fn store(&mut self, pointer: Handle<Inst>, value: Handle<Inst>) {
        self.push(None, InstKind::Store { pointer, value });
    }

    fn alloca(&mut self, ty: Handle<Type>) -> Handle<Inst> {
        let ptr = self
            .module
            .type_pointer(spirv::StorageClass::Function, ty);
        self.push(
            Some(ptr),
            InstKind::Variable {
                class: spirv::StorageClass::Function,
                init: None,
            },
        )
    }

    fn access_chain(
        &mut self,
        pointee: Handle<Type>,
        base: Handle<Inst>,
        indices: Vec<Handle<Inst>>,
    ) -> Handle<Inst> {
        let class = self
            .module
            .instructions[base]
            .ty
            .and_then(|ty| match self.module.types[ty].inner {
                TypeInner::Pointer { class, .. } => Some(class),
                _ => None,
            })
            .unwrap_or(spirv::StorageClass::Function);
        let ptr = self.module.type_pointer(class, pointee);
        self.push(Some(ptr), InstKind::AccessChain { base, indices })
    }

    fn value_type(&self, value: Handle<Inst>) -> Option<Handle<Type>> {
        self.module.instructions[value].ty
    }

    /// Coerce a loaded value to `bool` by comparing against zero.
    fn bool_val(&mut self, value: Handle<Inst>) -> Handle<Inst> {
        let bool_ty = self.module.type_bool();
        let ty = match self.value_type(value) {
            Some(ty) => ty,
            None => return value,
        };
        match self.module.types[ty].inner {
            TypeInner::Bool => value,
            TypeInner::Int { .. } => {
                let zero = self.module.constant(ty, ScalarValue::Uint(0));
                self.push(
                    Some(bool_ty),
                    InstKind::Binary {
                        op: spirv::Op::INotEqual,
                        left: value,
                        right: zero,
                    },
                )
            }
            TypeInner::Float { .. } => {
                let zero = self.module.constant(ty, ScalarValue::Float(0.0));
                self.push(
                    Some(bool_ty),
                    InstKind::Binary {
                        op: spirv::Op::FOrdNotEqual,
                        left: value,
                        right: zero,
                    },
                )
            }
            _ => value,
        }
    }

    //
    // Type conversion
    //

    /// The scalar element of a scalar, vector or matrix AST type.
    fn ast_scalar(&self, ty: Handle<ast::Type>) -> Handle<ast::Type> {
        match self.unit.types[ty].inner {
            ast::TypeInner::Vector { elem, .. } => elem,
            ast::TypeInner::Matrix { column, .. } => self.ast_scalar(column),
            _ => ty,
        }
    }

    fn convert_type(&mut self, ty: Handle<ast::Type>) -> Option<Handle<Type>> {
        if let Some(&converted) = self.type_map.get(&ty) {
            return Some(converted);
        }

        let converted = match self.unit.types[ty].inner {
            ast::TypeInner::Void => self.module.type_void(),
            ast::TypeInner::Meta => return None,
            ast::TypeInner::Scalar { kind, width } => match kind {
                ScalarKind::Bool => self.module.type_bool(),
                ScalarKind::Float => self.module.type_float(width),
                ScalarKind::Sint => self.module.type_int(width, true),
                ScalarKind::Uint => self.module.type_int(width, false),
            },
            ast::TypeInner::Vector { elem, size } => {
                let elem = self.convert_type(elem)?;
                self.module.type_vector(elem, size)
            }
            ast::TypeInner::Matrix { columns, column } => {
                let column = self.convert_type(column)?;
                self.module.type_matrix(columns, column)
            }
            ast::TypeInner::Pointer { class, base } => {
                let base = self.convert_type(base)?;
                self.module.type_pointer(class, base)
            }
            ast::TypeInner::Function { ret, ref params } => {
                let params = params.clone();
                let ret = self.convert_type(ret)?;
                let params = params
                    .into_iter()
                    .map(|param| self.convert_type(param))
                    .collect::<Option<Vec<_>>>()?;
                self.module.type_function(ret, params)
            }
            ast::TypeInner::Struct { ref members, .. } => {
                let name = self.unit.types[ty]
                    .name
                    .clone()
                    .unwrap_or_else(|| "anonymous".to_string());
                let members: Vec<(Handle<ast::Type>, u32)> =
                    members.iter().map(|m| (m.ty, m.offset)).collect();
                let mut member_types = Vec::with_capacity(members.len());
                for &(member_ty, _) in &members {
                    member_types.push(self.convert_type(member_ty)?);
                }
                let converted = self.module.type_struct(name, member_types);
                for (index, &(member_ty, offset)) in members.iter().enumerate() {
                    self.module.decorate_type_member(
                        converted,
                        MemberDecoration::with(spirv::Decoration::Offset, index as u32, offset),
                    );
                    if let ast::TypeInner::Matrix { column, .. } = self.unit.types[member_ty].inner
                    {
                        let stride = layout::matrix_stride(&self.unit.types, column);
                        self.module.decorate_type_member(
                            converted,
                            MemberDecoration::new(spirv::Decoration::ColMajor, index as u32),
                        );
                        self.module.decorate_type_member(
                            converted,
                            MemberDecoration::with(
                                spirv::Decoration::MatrixStride,
                                index as u32,
                                stride,
                            ),
                        );
                    }
                }
                converted
            }
            ast::TypeInner::ConstantBuffer { base } => {
                let converted = self.convert_type(base)?;
                self.module
                    .decorate_type(converted, Decoration::new(spirv::Decoration::Block));
                converted
            }
            ast::TypeInner::StructuredBuffer { base }
            | ast::TypeInner::RwStructuredBuffer { base } => {
                let writable = matches!(
                    self.unit.types[ty].inner,
                    ast::TypeInner::RwStructuredBuffer { .. }
                );
                let stride = layout::size_of(&self.unit.types, base);
                let elem = self.convert_type(base)?;
                let array = self.module.type_runtime_array(elem);
                self.module.decorate_type(
                    array,
                    Decoration::with(spirv::Decoration::ArrayStride, stride),
                );

                let name = format!("buffer_wrapper_{}", self.counter);
                self.counter += 1;
                let wrapper = self.module.type_struct(name, vec![array]);
                self.module
                    .decorate_type(wrapper, Decoration::new(spirv::Decoration::BufferBlock));
                self.module.decorate_type_member(
                    wrapper,
                    MemberDecoration::with(spirv::Decoration::Offset, 0, 0),
                );
                if !writable {
                    self.module.decorate_type_member(
                        wrapper,
                        MemberDecoration::new(spirv::Decoration::NonWritable, 0),
                    );
                }
                wrapper
            }
            ast::TypeInner::Sampler => self.module.type_sampler(),
            ast::TypeInner::Image { sampled, dim } => {
                let scalar = self.ast_scalar(sampled);
                let sampled = self.convert_type(scalar)?;
                self.module.type_image(sampled, dim)
            }
            ast::TypeInner::SampledImage { image } => {
                let image = self.convert_type(image)?;
                self.module.type_sampled_image(image)
            }
        };

        self.type_map.insert(ty, converted);
        Some(converted)
    }

    fn expr_type(&mut self, expr: Handle<ast::Expr>) -> Option<Handle<Type>> {
        let ty = self.unit.exprs[expr].ty?;
        self.convert_type(ty)
    }

    //
    // Declarations
    //

    fn declare_function(&mut self, decl: Handle<ast::Decl>) {
        let function = match self.unit.decls[decl] {
            ast::Decl {
                kind: DeclKind::Function(ref function),
                ty: Some(ty),
                ..
            } => {
                let params = function.params.clone();
                let ty = match self.convert_type(ty) {
                    Some(ty) => ty,
                    None => return,
                };
                let handle = self.module.add_function(ty);
                for &param in &params {
                    let by_reference = match self.unit.decls[param].kind {
                        DeclKind::Var(ref var) => var.kind.is_by_reference(),
                        _ => false,
                    };
                    let value_ty = match self.unit.decls[param].ty.and_then(|t| self.convert_type(t))
                    {
                        Some(ty) => ty,
                        None => continue,
                    };
                    let param_ty = if by_reference {
                        self.module
                            .type_pointer(spirv::StorageClass::Function, value_ty)
                    } else {
                        value_ty
                    };
                    let param_inst = self.module.add_parameter(handle, param_ty, by_reference);
                    self.decl_values.insert(param, param_inst);
                }
                handle
            }
            _ => return,
        };
        self.decl_values.insert(decl, function);
    }

    fn declare_global(&mut self, decl: Handle<ast::Decl>) {
        let (ty, var_kind) = match self.unit.decls[decl] {
            ast::Decl {
                kind: DeclKind::Var(ref var),
                ty: Some(ty),
                ..
            } => (ty, var.kind),
            _ => return,
        };

        let class = match self.unit.types[ty].inner {
            ast::TypeInner::Sampler
            | ast::TypeInner::Image { .. }
            | ast::TypeInner::SampledImage { .. } => spirv::StorageClass::UniformConstant,
            ast::TypeInner::ConstantBuffer { .. }
            | ast::TypeInner::StructuredBuffer { .. }
            | ast::TypeInner::RwStructuredBuffer { .. } => spirv::StorageClass::Uniform,
            _ if var_kind == ast::VarKind::GroupShared => spirv::StorageClass::Workgroup,
            _ => return,
        };

        let converted = match self.convert_type(ty) {
            Some(ty) => ty,
            None => return,
        };
        let global = self.module.add_global(converted, class);
        self.module.instructions.get_mut(global).decorations =
            self.unit.decls[decl].decorations.clone();
        self.decl_values.insert(decl, global);
    }

    fn lower_const(&mut self, decl: Handle<ast::Decl>) {
        let (location, init, ty) = match self.unit.decls[decl] {
            ast::Decl {
                location,
                kind: DeclKind::Const(ref constant),
                ty: Some(ty),
                ..
            } => (location, constant.init, ty),
            _ => return,
        };

        let converted = match self.convert_type(ty) {
            Some(ty) => ty,
            None => return,
        };

        let value = match self.const_value(init, converted) {
            Some(value) => value,
            None => {
                self.internal(location);
                return;
            }
        };
        let constant = self.module.constant(converted, value);
        self.decl_values.insert(decl, constant);
    }

    fn const_value(&self, init: Handle<ast::Expr>, ty: Handle<Type>) -> Option<ScalarValue> {
        if let Some(value) = self.unit.exprs[init].const_int {
            return Some(match self.module.types[ty].inner {
                TypeInner::Float { .. } => ScalarValue::Float(value as f64),
                TypeInner::Int { signed: false, .. } => ScalarValue::Uint(value as u64),
                _ => ScalarValue::Sint(value),
            });
        }
        let literal = match self.unit.exprs[init].kind {
            ExprKind::Literal(ref literal) => literal.clone(),
            ExprKind::Unary {
                op: UnaryOp::Negate,
                expr,
            } => match self.unit.exprs[expr].kind {
                ExprKind::Literal(Literal::Float(value)) => Literal::Float(-value),
                ExprKind::Literal(Literal::Int(value)) => Literal::Int(-value),
                _ => return None,
            },
            _ => return None,
        };
        Some(match literal {
            Literal::Bool(value) => ScalarValue::Bool(value),
            Literal::Float(value) => ScalarValue::Float(value),
            Literal::Int(value) => match self.module.types[ty].inner {
                TypeInner::Float { .. } => ScalarValue::Float(value as f64),
                TypeInner::Int { signed: false, .. } => ScalarValue::Uint(value as u64),
                _ => ScalarValue::Sint(value),
            },
        })
    }

    fn declare_stage_io(
        &mut self,
        io: &[ast::StageIo],
        class: spirv::StorageClass,
    ) -> Vec<Handle<Inst>> {
        let mut vars = Vec::with_capacity(io.len());
        for entry in io {
            let ty = match self.convert_type(entry.ty) {
                Some(ty) => ty,
                None => continue,
            };
            let var = self.module.add_global(ty, class);
            self.module.instructions.get_mut(var).decorations = entry.decorations.clone();
            vars.push(var);
        }
        vars
    }

    //
    // Function bodies
    //

    fn build_function(&mut self, decl: Handle<ast::Decl>) {
        let (params, locals, body) = match self.unit.decls[decl].kind {
            DeclKind::Function(ref function) => (
                function.params.clone(),
                function.locals.clone(),
                function.body.clone(),
            ),
            _ => return,
        };
        let function = match self.decl_values.get(&decl) {
            Some(&function) => function,
            None => return,
        };

        self.current_function = Some(function);
        let entry_block = self.module.create_block();
        self.position_at_end(entry_block);
        self.attach(entry_block);

        // All variables go into the entry block first, then the by-value
        // parameters are copied so every use site sees an lvalue.
        let mut copies = Vec::new();
        for &param in &params {
            let by_reference = match self.unit.decls[param].kind {
                DeclKind::Var(ref var) => var.kind.is_by_reference(),
                _ => false,
            };
            if by_reference {
                continue;
            }
            let param_inst = match self.decl_values.get(&param) {
                Some(&inst) => inst,
                None => continue,
            };
            let ty = match self.unit.decls[param].ty.and_then(|t| self.convert_type(t)) {
                Some(ty) => ty,
                None => continue,
            };
            let slot = self.alloca(ty);
            copies.push((param, slot, param_inst));
        }
        for &local in &locals {
            if let Some(ty) = self.unit.decls[local].ty.and_then(|t| self.convert_type(t)) {
                let slot = self.alloca(ty);
                self.decl_values.insert(local, slot);
            }
        }
        for &(param, slot, param_inst) in &copies {
            self.store(slot, param_inst);
            self.decl_values.insert(param, slot);
        }

        for &stmt in &body {
            self.lower_stmt(stmt);
            if self.current_terminated() {
                break;
            }
        }
        if !self.current_terminated() {
            self.push(None, InstKind::Return { value: None });
        }

        self.current_function = None;
        self.current_block = None;
    }

    //
    // Statements
    //

    fn lower_stmt(&mut self, stmt: Handle<ast::Stmt>) {
        let location = self.unit.stmts[stmt].location;
        match self.unit.stmts[stmt].kind {
            StmtKind::Decl(decl) => match self.unit.decls[decl].kind {
                DeclKind::Var(ref var) => {
                    if let Some(init) = var.init {
                        let target = match self.decl_values.get(&decl) {
                            Some(&slot) => slot,
                            None => return,
                        };
                        if let Some(value) = self.lower_expr(init) {
                            let value = self.load_val(value);
                            let value = self.convert_to_pointee(target, value);
                            self.store(target, value);
                        }
                    }
                }
                DeclKind::Const(_) => self.lower_const(decl),
                _ => {}
            },
            StmtKind::Expr(expr) => {
                let _ = self.lower_expr(expr);
            }
            StmtKind::Assign { target, value } => self.lower_assign(target, value, location),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => match self.lower_expr(expr) {
                        Some(value) => Some(self.load_val(value)),
                        None => return,
                    },
                    None => None,
                };
                self.push(None, InstKind::Return { value });
            }
            StmtKind::Discard => {
                self.push(None, InstKind::Discard);
            }
            StmtKind::Continue => {
                let target = match self.continue_stack.last() {
                    Some(&target) => target,
                    None => {
                        self.internal(location);
                        return;
                    }
                };
                self.push(
                    None,
                    InstKind::Branch {
                        target,
                        merge: None,
                        continuing: None,
                    },
                );
            }
            StmtKind::Break => {
                let target = match self.break_stack.last() {
                    Some(&target) => target,
                    None => {
                        self.internal(location);
                        return;
                    }
                };
                self.push(
                    None,
                    InstKind::Branch {
                        target,
                        merge: None,
                        continuing: None,
                    },
                );
            }
            StmtKind::Block(ref stmts) => {
                let stmts = stmts.clone();
                for stmt in stmts {
                    self.lower_stmt(stmt);
                    if self.current_terminated() {
                        break;
                    }
                }
            }
            StmtKind::If {
                condition,
                accept,
                reject,
            } => self.lower_if(condition, accept, reject),
            StmtKind::While { condition, body } => self.lower_while(condition, body),
            StmtKind::DoWhile { body, condition } => self.lower_do_while(body, condition),
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => self.lower_for(init, condition, step, body),
        }
    }

    fn lower_condition(&mut self, condition: Handle<ast::Expr>) -> Option<Handle<Inst>> {
        let value = self.lower_expr(condition)?;
        let value = self.load_val(value);
        Some(self.bool_val(value))
    }

    fn lower_if(
        &mut self,
        condition: Handle<ast::Expr>,
        accept: Handle<ast::Stmt>,
        reject: Option<Handle<ast::Stmt>>,
    ) {
        let cond = match self.lower_condition(condition) {
            Some(cond) => cond,
            None => return,
        };

        let accept_block = self.module.create_block();
        let reject_block = reject.map(|_| self.module.create_block());
        let merge_block = self.module.create_block();
        let reject_target = reject_block.unwrap_or(merge_block);

        self.push(
            None,
            InstKind::BranchConditional {
                condition: cond,
                accept: accept_block,
                reject: reject_target,
                merge: Some(merge_block),
                continuing: None,
            },
        );

        self.position_at_end(accept_block);
        self.attach(accept_block);
        self.lower_stmt(accept);
        if !self.current_terminated() {
            self.push(
                None,
                InstKind::Branch {
                    target: merge_block,
                    merge: None,
                    continuing: None,
                },
            );
        }

        if let (Some(reject), Some(reject_block)) = (reject, reject_block) {
            self.position_at_end(reject_block);
            self.attach(reject_block);
            self.lower_stmt(reject);
            if !self.current_terminated() {
                self.push(
                    None,
                    InstKind::Branch {
                        target: merge_block,
                        merge: None,
                        continuing: None,
                    },
                );
            }
        }

        self.position_at_end(merge_block);
        self.attach(merge_block);
    }

    fn lower_while(&mut self, condition: Handle<ast::Expr>, body: Handle<ast::Stmt>) {
        let check_block = self.module.create_block();
        let body_block = self.module.create_block();
        let continue_block = self.module.create_block();
        let merge_block = self.module.create_block();

        self.push(
            None,
            InstKind::Branch {
                target: check_block,
                merge: None,
                continuing: None,
            },
        );

        self.position_at_end(check_block);
        self.attach(check_block);
        if let Some(cond) = self.lower_condition(condition) {
            if !self.current_terminated() {
                self.push(
                    None,
                    InstKind::BranchConditional {
                        condition: cond,
                        accept: body_block,
                        reject: merge_block,
                        merge: Some(merge_block),
                        continuing: Some(continue_block),
                    },
                );
            }
        }

        self.position_at_end(body_block);
        self.attach(body_block);
        self.continue_stack.push(continue_block);
        self.break_stack.push(merge_block);
        self.lower_stmt(body);
        self.continue_stack.pop();
        self.break_stack.pop();
        if !self.current_terminated() {
            self.push(
                None,
                InstKind::Branch {
                    target: continue_block,
                    merge: None,
                    continuing: None,
                },
            );
        }

        self.position_at_end(continue_block);
        self.attach(continue_block);
        self.push(
            None,
            InstKind::Branch {
                target: check_block,
                merge: None,
                continuing: None,
            },
        );

        self.position_at_end(merge_block);
        self.attach(merge_block);
    }

    fn lower_do_while(&mut self, body: Handle<ast::Stmt>, condition: Handle<ast::Expr>) {
        let header_block = self.module.create_block();
        let body_block = self.module.create_block();
        let continue_block = self.module.create_block();
        let merge_block = self.module.create_block();

        self.push(
            None,
            InstKind::Branch {
                target: header_block,
                merge: None,
                continuing: None,
            },
        );

        self.position_at_end(header_block);
        self.attach(header_block);
        self.push(
            None,
            InstKind::Branch {
                target: body_block,
                merge: Some(merge_block),
                continuing: Some(continue_block),
            },
        );

        self.position_at_end(body_block);
        self.attach(body_block);
        self.continue_stack.push(continue_block);
        self.break_stack.push(merge_block);
        self.lower_stmt(body);
        self.continue_stack.pop();
        self.break_stack.pop();
        if !self.current_terminated() {
            self.push(
                None,
                InstKind::Branch {
                    target: continue_block,
                    merge: None,
                    continuing: None,
                },
            );
        }

        self.position_at_end(continue_block);
        self.attach(continue_block);
        if let Some(cond) = self.lower_condition(condition) {
            if !self.current_terminated() {
                self.push(
                    None,
                    InstKind::BranchConditional {
                        condition: cond,
                        accept: header_block,
                        reject: merge_block,
                        merge: None,
                        continuing: None,
                    },
                );
            }
        }

        self.position_at_end(merge_block);
        self.attach(merge_block);
    }

    fn lower_for(
        &mut self,
        init: Option<Handle<ast::Stmt>>,
        condition: Option<Handle<ast::Expr>>,
        step: Option<Handle<ast::Stmt>>,
        body: Handle<ast::Stmt>,
    ) {
        if let Some(init) = init {
            self.lower_stmt(init);
        }

        let check_block = self.module.create_block();
        let body_block = self.module.create_block();
        let continue_block = self.module.create_block();
        let merge_block = self.module.create_block();

        self.push(
            None,
            InstKind::Branch {
                target: check_block,
                merge: None,
                continuing: None,
            },
        );

        self.position_at_end(check_block);
        self.attach(check_block);
        let cond = match condition {
            Some(condition) => self.lower_condition(condition),
            None => Some(self.module.const_bool(true)),
        };
        if let Some(cond) = cond {
            if !self.current_terminated() {
                self.push(
                    None,
                    InstKind::BranchConditional {
                        condition: cond,
                        accept: body_block,
                        reject: merge_block,
                        merge: Some(merge_block),
                        continuing: Some(continue_block),
                    },
                );
            }
        }

        self.position_at_end(body_block);
        self.attach(body_block);
        self.continue_stack.push(continue_block);
        self.break_stack.push(merge_block);
        self.lower_stmt(body);
        self.continue_stack.pop();
        self.break_stack.pop();
        if !self.current_terminated() {
            self.push(
                None,
                InstKind::Branch {
                    target: continue_block,
                    merge: None,
                    continuing: None,
                },
            );
        }

        self.position_at_end(continue_block);
        self.attach(continue_block);
        if let Some(step) = step {
            self.lower_stmt(step);
        }
        self.push(
            None,
            InstKind::Branch {
                target: check_block,
                merge: None,
                continuing: None,
            },
        );

        self.position_at_end(merge_block);
        self.attach(merge_block);
    }

    //
    // Assignment
    //

    fn lower_assign(
        &mut self,
        target: Handle<ast::Expr>,
        value: Handle<ast::Expr>,
        location: Location,
    ) {
        // A multi-component swizzle on the left-hand side becomes one
        // extract/store pair per selected component.
        if let ExprKind::Access { base, ref chain } = self.unit.exprs[target].kind {
            let chain = chain.clone();
            if let Some(&last) = chain.last() {
                let swizzle = match self.unit.exprs[last].kind {
                    ExprKind::Ident { ref swizzle, .. } => swizzle.clone(),
                    _ => None,
                };
                if let Some(swizzle) = swizzle.filter(|s| s.len() > 1) {
                    let value = match self.lower_expr(value) {
                        Some(value) => self.load_val(value),
                        None => return,
                    };
                    let prefix =
                        match self.lower_access_chain(base, &chain[..chain.len() - 1]) {
                            Some(prefix) => prefix,
                            None => return,
                        };
                    if !self.is_lvalue(prefix) {
                        self.internal(location);
                        return;
                    }
                    let elem_ty = self
                        .value_type(prefix)
                        .and_then(|ty| self.module.pointer_base(ty))
                        .and_then(|ty| match self.module.types[ty].inner {
                            TypeInner::Vector { elem, .. } => Some(elem),
                            _ => None,
                        });
                    let elem_ty = match elem_ty {
                        Some(ty) => ty,
                        None => {
                            self.internal(location);
                            return;
                        }
                    };
                    for (position, &component) in swizzle.iter().enumerate() {
                        let extracted = self.push(
                            Some(elem_ty),
                            InstKind::CompositeExtract {
                                value,
                                indices: vec![position as u32],
                            },
                        );
                        let index = self.module.const_uint(component);
                        let pointer = self.access_chain(elem_ty, prefix, vec![index]);
                        self.store(pointer, extracted);
                    }
                    return;
                }
            }
        }

        let value = match self.lower_expr(value) {
            Some(value) => self.load_val(value),
            None => return,
        };
        let target = match self.lower_expr(target) {
            Some(target) => target,
            None => return,
        };
        let value = self.convert_to_pointee(target, value);
        self.store(target, value);
    }

    /// Insert an implicit scalar conversion so that `value` matches the
    /// pointee type of `pointer`.
    fn convert_to_pointee(&mut self, pointer: Handle<Inst>, value: Handle<Inst>) -> Handle<Inst> {
        let target_ty = match self
            .value_type(pointer)
            .and_then(|ty| self.module.pointer_base(ty))
        {
            Some(ty) => ty,
            None => return value,
        };
        self.convert_value(value, target_ty)
    }

    fn convert_value(&mut self, value: Handle<Inst>, target_ty: Handle<Type>) -> Handle<Inst> {
        let source_ty = match self.value_type(value) {
            Some(ty) => ty,
            None => return value,
        };
        if source_ty == target_ty {
            return value;
        }
        match self.cast_op(source_ty, target_ty) {
            Some(op) => self.push(
                Some(target_ty),
                InstKind::Cast {
                    op,
                    value,
                    redundant: false,
                },
            ),
            None => value,
        }
    }

    /// The SPIR-V conversion opcode between two numeric types, if one
    /// exists. Vector conversions are driven by their element types.
    fn cast_op(&self, source: Handle<Type>, target: Handle<Type>) -> Option<spirv::Op> {
        use spirv::Op;
        let (source, target) = match (
            &self.module.types[source].inner,
            &self.module.types[target].inner,
        ) {
            (&TypeInner::Vector { elem: s, .. }, &TypeInner::Vector { elem: t, .. }) => (s, t),
            _ => (source, target),
        };
        Some(
            match (
                &self.module.types[source].inner,
                &self.module.types[target].inner,
            ) {
                (&TypeInner::Int { signed: true, .. }, &TypeInner::Int { signed: true, .. }) => {
                    Op::SConvert
                }
                (&TypeInner::Int { signed: false, .. }, &TypeInner::Int { signed: false, .. }) => {
                    Op::UConvert
                }
                // Signedness reinterpretation keeps the bits.
                (&TypeInner::Int { .. }, &TypeInner::Int { .. }) => Op::Bitcast,
                (&TypeInner::Int { signed: true, .. }, &TypeInner::Float { .. }) => {
                    Op::ConvertSToF
                }
                (&TypeInner::Int { signed: false, .. }, &TypeInner::Float { .. }) => {
                    Op::ConvertUToF
                }
                (&TypeInner::Float { .. }, &TypeInner::Int { signed: true, .. }) => {
                    Op::ConvertFToS
                }
                (&TypeInner::Float { .. }, &TypeInner::Int { signed: false, .. }) => {
                    Op::ConvertFToU
                }
                (&TypeInner::Float { .. }, &TypeInner::Float { .. }) => Op::FConvert,
                _ => return None,
            },
        )
    }

    //
    // Expressions
    //

    fn lower_expr(&mut self, expr: Handle<ast::Expr>) -> Option<Handle<Inst>> {
        let location = self.unit.exprs[expr].location;
        match self.unit.exprs[expr].kind {
            ExprKind::Literal(ref literal) => {
                let literal = literal.clone();
                let ty = self.expr_type(expr)?;
                let value = match literal {
                    Literal::Bool(value) => ScalarValue::Bool(value),
                    Literal::Float(value) => ScalarValue::Float(value),
                    Literal::Int(value) => match self.module.types[ty].inner {
                        TypeInner::Float { .. } => ScalarValue::Float(value as f64),
                        TypeInner::Int { signed: false, .. } => ScalarValue::Uint(value as u64),
                        _ => ScalarValue::Sint(value),
                    },
                };
                Some(self.module.constant(ty, value))
            }
            ExprKind::Ident { decl, .. } => {
                let decl = decl?;
                // cbuffer members resolve through their owning global.
                if let Some(&(owner, index)) = self.unit.cbuffer_members.get(&decl) {
                    let base = *self.decl_values.get(&owner)?;
                    let ty = self.expr_type(expr)?;
                    let index = self.module.const_uint(index);
                    return Some(self.access_chain(ty, base, vec![index]));
                }
                match self.decl_values.get(&decl) {
                    Some(&value) => Some(value),
                    None => {
                        self.internal(location);
                        None
                    }
                }
            }
            ExprKind::Access { base, ref chain } => {
                let chain = chain.clone();
                self.lower_access_chain(base, &chain)
            }
            ExprKind::Subscript { base, index } => self.lower_subscript(expr, base, index),
            ExprKind::TypeRef(_) => {
                self.internal(location);
                None
            }
            ExprKind::Call {
                callee,
                ref args,
                object,
            } => {
                let args = args.clone();
                match object {
                    Some(object) => self.lower_sample(expr, &args, object),
                    None => {
                        if self.unit.exprs[callee].as_type.is_some() {
                            self.lower_constructor(expr, callee, &args)
                        } else {
                            self.lower_call(expr, callee, &args)
                        }
                    }
                }
            }
            ExprKind::IntrinsicCall { op, ref args } => {
                let args = args.clone();
                self.lower_intrinsic(expr, op, &args)
            }
            ExprKind::BarrierCall { scope, group_sync } => {
                Some(self.lower_barrier(scope, group_sync))
            }
            ExprKind::Unary { op, expr: operand } => self.lower_unary(expr, op, operand),
            ExprKind::Binary { op, left, right } => self.lower_binary(expr, op, left, right),
        }
    }

    /// Lower `base.a.b.xy`, consuming only the given part of the chain.
    /// Struct field links collapse into a single access chain; swizzles
    /// follow as access chains, extracts or shuffles depending on
    /// lvalue-ness and component count.
    fn lower_access_chain(
        &mut self,
        base: Handle<ast::Expr>,
        chain: &[Handle<ast::Expr>],
    ) -> Option<Handle<Inst>> {
        let mut value = self.lower_expr(base)?;

        // Leading run of struct fields.
        let mut position = 0;
        let mut field_indices = Vec::new();
        while position < chain.len() {
            let ident = chain[position];
            let field_index = match self.unit.exprs[ident].kind {
                ExprKind::Ident {
                    decl: Some(decl),
                    swizzle: None,
                    ..
                } => match self.unit.decls[decl].kind {
                    DeclKind::Field(ref field) => Some(field.index),
                    _ => None,
                },
                _ => None,
            };
            match field_index {
                Some(index) => field_indices.push(index),
                None => break,
            }
            position += 1;
        }

        if position > 0 {
            let last_ty = self
                .unit
                .exprs[chain[position - 1]]
                .ty
                .and_then(|ty| self.convert_type(ty))?;
            if self.is_lvalue(value) {
                let indices = field_indices
                    .iter()
                    .map(|&index| self.module.const_uint(index))
                    .collect();
                value = self.access_chain(last_ty, value, indices);
            } else {
                value = self.push(
                    Some(last_ty),
                    InstKind::CompositeExtract {
                        value,
                        indices: field_indices,
                    },
                );
            }
        }

        // The rest of the chain is vector swizzles.
        for &ident in &chain[position..] {
            let (swizzle, ident_ty) = match self.unit.exprs[ident].kind {
                ExprKind::Ident { ref swizzle, .. } => {
                    (swizzle.clone()?, self.unit.exprs[ident].ty)
                }
                _ => return None,
            };
            let ident_ty = ident_ty.and_then(|ty| self.convert_type(ty))?;

            if swizzle.len() == 1 {
                if self.is_lvalue(value) {
                    let index = self.module.const_uint(swizzle[0]);
                    value = self.access_chain(ident_ty, value, vec![index]);
                } else {
                    let loaded = self.load_val(value);
                    value = self.push(
                        Some(ident_ty),
                        InstKind::CompositeExtract {
                            value: loaded,
                            indices: swizzle,
                        },
                    );
                }
            } else {
                let loaded = self.load_val(value);
                value = self.push(
                    Some(ident_ty),
                    InstKind::VectorShuffle {
                        left: loaded,
                        right: loaded,
                        pattern: swizzle,
                    },
                );
            }
        }

        Some(value)
    }

    fn lower_subscript(
        &mut self,
        expr: Handle<ast::Expr>,
        base: Handle<ast::Expr>,
        index: Handle<ast::Expr>,
    ) -> Option<Handle<Inst>> {
        let location = self.unit.exprs[expr].location;
        let base_ast_ty = self.unit.exprs[base].ty?;
        let base_value = self.lower_expr(base)?;
        let index_value = self.lower_expr(index)?;
        let index_value = self.load_val(index_value);
        let result_ty = self.expr_type(expr)?;

        let is_buffer = matches!(
            self.unit.types[base_ast_ty].inner,
            ast::TypeInner::StructuredBuffer { .. } | ast::TypeInner::RwStructuredBuffer { .. }
        );

        if self.is_lvalue(base_value) {
            let indices = if is_buffer {
                // Field 0 of the wrapper struct is the runtime array.
                let zero = self.module.const_uint(0);
                vec![zero, index_value]
            } else {
                vec![index_value]
            };
            return Some(self.access_chain(result_ty, base_value, indices));
        }

        // Indexing a temporary only works with a constant index.
        match self.unit.exprs[index].const_int {
            Some(constant) if !is_buffer => Some(self.push(
                Some(result_ty),
                InstKind::CompositeExtract {
                    value: base_value,
                    indices: vec![constant as u32],
                },
            )),
            _ => {
                self.internal(location);
                None
            }
        }
    }

    fn lower_sample(
        &mut self,
        expr: Handle<ast::Expr>,
        args: &[Handle<ast::Expr>],
        object: Handle<ast::Expr>,
    ) -> Option<Handle<Inst>> {
        let image = self.lower_expr(object)?;
        let image = self.load_val(image);
        let sampler = self.lower_expr(args[0])?;
        let sampler = self.load_val(sampler);
        let coordinate = self.lower_expr(args[1])?;
        let coordinate = self.load_val(coordinate);

        let image_ty = self.value_type(image)?;
        let sampled_ty = self.module.type_sampled_image(image_ty);
        let sampled_image = self.push(Some(sampled_ty), InstKind::SampledImage { image, sampler });

        let result_ty = self.expr_type(expr)?;
        Some(self.push(
            Some(result_ty),
            InstKind::SampleImplicitLod {
                sampled_image,
                coordinate,
            },
        ))
    }

    fn lower_constructor(
        &mut self,
        expr: Handle<ast::Expr>,
        callee: Handle<ast::Expr>,
        args: &[Handle<ast::Expr>],
    ) -> Option<Handle<Inst>> {
        let location = self.unit.exprs[expr].location;
        let constructed = self.unit.exprs[callee].as_type?;
        let result_ty = self.convert_type(constructed)?;

        match self.unit.types[constructed].inner {
            ast::TypeInner::Scalar { .. } => {
                let value = self.lower_expr(args[0])?;
                let value = self.load_val(value);
                let source_ty = self.value_type(value)?;
                if source_ty == result_ty {
                    return Some(self.push(
                        Some(result_ty),
                        InstKind::Cast {
                            op: spirv::Op::Nop,
                            value,
                            redundant: true,
                        },
                    ));
                }
                let op = match self.cast_op(source_ty, result_ty) {
                    Some(op) => op,
                    None => {
                        self.internal(location);
                        return None;
                    }
                };
                Some(self.push(
                    Some(result_ty),
                    InstKind::Cast {
                        op,
                        value,
                        redundant: false,
                    },
                ))
            }
            ast::TypeInner::Vector { .. } => {
                let mut components = Vec::with_capacity(args.len());
                for &arg in args {
                    let value = self.lower_expr(arg)?;
                    components.push(self.load_val(value));
                }
                Some(self.push(Some(result_ty), InstKind::CompositeConstruct { components }))
            }
            ast::TypeInner::Matrix { .. } => {
                let (column_ty, rows) = match self.module.types[result_ty].inner {
                    TypeInner::Matrix { column, .. } => match self.module.types[column].inner {
                        TypeInner::Vector { size, .. } => (column, size as usize),
                        _ => return None,
                    },
                    _ => return None,
                };
                let mut columns = Vec::new();
                for scalars in args.chunks(rows) {
                    let mut components = Vec::with_capacity(rows);
                    for &arg in scalars {
                        let value = self.lower_expr(arg)?;
                        components.push(self.load_val(value));
                    }
                    columns.push(self.push(
                        Some(column_ty),
                        InstKind::CompositeConstruct { components },
                    ));
                }
                Some(self.push(
                    Some(result_ty),
                    InstKind::CompositeConstruct {
                        components: columns,
                    },
                ))
            }
            _ => {
                self.internal(location);
                None
            }
        }
    }

    fn lower_call(
        &mut self,
        expr: Handle<ast::Expr>,
        callee: Handle<ast::Expr>,
        args: &[Handle<ast::Expr>],
    ) -> Option<Handle<Inst>> {
        let location = self.unit.exprs[expr].location;
        let function_decl = match self.unit.exprs[callee].kind {
            ExprKind::Ident {
                decl: Some(decl), ..
            } => decl,
            _ => {
                self.internal(location);
                return None;
            }
        };
        let function = match self.decl_values.get(&function_decl) {
            Some(&function) => function,
            None => {
                self.internal(location);
                return None;
            }
        };

        let params = match self.unit.decls[function_decl].kind {
            DeclKind::Function(ref function) => function.params.clone(),
            _ => return None,
        };

        let mut arguments = Vec::with_capacity(args.len());
        for (&arg, &param) in args.iter().zip(&params) {
            let by_reference = match self.unit.decls[param].kind {
                DeclKind::Var(ref var) => var.kind.is_by_reference(),
                _ => false,
            };
            let value = self.lower_expr(arg)?;
            if by_reference {
                if !self.is_lvalue(value) {
                    self.diagnostics.add(
                        self.unit.exprs[arg].location,
                        "function parameter needs to be an lvalue".to_string(),
                    );
                    return None;
                }
                arguments.push(value);
            } else {
                let value = self.load_val(value);
                let param_ty = self.unit.decls[param].ty.and_then(|t| self.convert_type(t));
                let value = match param_ty {
                    Some(param_ty) => self.convert_value(value, param_ty),
                    None => value,
                };
                arguments.push(value);
            }
        }

        let result_ty = self.expr_type(expr)?;
        Some(self.push(
            Some(result_ty),
            InstKind::Call {
                function,
                arguments,
            },
        ))
    }

    fn lower_barrier(&mut self, scope: BarrierScope, group_sync: bool) -> Handle<Inst> {
        use spirv::MemorySemantics;

        let (memory_scope, semantics) = match scope {
            BarrierScope::Group => (
                spirv::Scope::Workgroup,
                MemorySemantics::ACQUIRE_RELEASE | MemorySemantics::WORKGROUP_MEMORY,
            ),
            BarrierScope::Device => (
                spirv::Scope::Device,
                MemorySemantics::ACQUIRE_RELEASE
                    | MemorySemantics::UNIFORM_MEMORY
                    | MemorySemantics::IMAGE_MEMORY,
            ),
            BarrierScope::All => (
                spirv::Scope::Device,
                MemorySemantics::ACQUIRE_RELEASE
                    | MemorySemantics::UNIFORM_MEMORY
                    | MemorySemantics::WORKGROUP_MEMORY
                    | MemorySemantics::IMAGE_MEMORY,
            ),
        };

        let execution_scope = if group_sync {
            Some(self.module.const_uint(spirv::Scope::Workgroup as u32))
        } else {
            None
        };
        let memory_scope = self.module.const_uint(memory_scope as u32);
        let semantics = self.module.const_uint(semantics.bits());

        self.push(
            None,
            InstKind::Barrier {
                execution_scope,
                memory_scope,
                semantics,
            },
        )
    }

    fn lower_unary(
        &mut self,
        expr: Handle<ast::Expr>,
        op: UnaryOp,
        operand: Handle<ast::Expr>,
    ) -> Option<Handle<Inst>> {
        let location = self.unit.exprs[expr].location;
        match op {
            UnaryOp::Negate => {
                let value = self.lower_expr(operand)?;
                let value = self.load_val(value);
                let result_ty = self.expr_type(expr)?;
                let op = match self.scalar_kind_of(result_ty) {
                    Some(ScalarKind::Float) => spirv::Op::FNegate,
                    Some(ScalarKind::Sint) | Some(ScalarKind::Uint) => spirv::Op::SNegate,
                    _ => {
                        self.internal(location);
                        return None;
                    }
                };
                Some(self.push(Some(result_ty), InstKind::Unary { op, expr: value }))
            }
            UnaryOp::Not => {
                let value = self.lower_expr(operand)?;
                let value = self.load_val(value);
                let value = self.bool_val(value);
                let bool_ty = self.module.type_bool();
                Some(self.push(
                    Some(bool_ty),
                    InstKind::Unary {
                        op: spirv::Op::LogicalNot,
                        expr: value,
                    },
                ))
            }
            UnaryOp::BitNot => {
                let value = self.lower_expr(operand)?;
                let value = self.load_val(value);
                let result_ty = self.expr_type(expr)?;
                Some(self.push(
                    Some(result_ty),
                    InstKind::Unary {
                        op: spirv::Op::Not,
                        expr: value,
                    },
                ))
            }
            UnaryOp::PreIncrement
            | UnaryOp::PreDecrement
            | UnaryOp::PostIncrement
            | UnaryOp::PostDecrement => {
                let pointer = self.lower_expr(operand)?;
                let loaded = self.load_val(pointer);
                let result_ty = self.expr_type(expr)?;

                let increment = matches!(op, UnaryOp::PreIncrement | UnaryOp::PostIncrement);
                let (binary_op, one) = match self.module.types[result_ty].inner {
                    TypeInner::Float { .. } => (
                        if increment {
                            spirv::Op::FAdd
                        } else {
                            spirv::Op::FSub
                        },
                        self.module.constant(result_ty, ScalarValue::Float(1.0)),
                    ),
                    TypeInner::Int { signed, .. } => (
                        if increment {
                            spirv::Op::IAdd
                        } else {
                            spirv::Op::ISub
                        },
                        self.module.constant(
                            result_ty,
                            if signed {
                                ScalarValue::Sint(1)
                            } else {
                                ScalarValue::Uint(1)
                            },
                        ),
                    ),
                    _ => {
                        self.internal(location);
                        return None;
                    }
                };

                let updated = self.push(
                    Some(result_ty),
                    InstKind::Binary {
                        op: binary_op,
                        left: loaded,
                        right: one,
                    },
                );
                if self.is_lvalue(pointer) {
                    self.store(pointer, updated);
                }
                let pre = matches!(op, UnaryOp::PreIncrement | UnaryOp::PreDecrement);
                Some(if pre { updated } else { loaded })
            }
        }
    }

    fn scalar_kind_of(&self, ty: Handle<Type>) -> Option<ScalarKind> {
        match self.module.types[ty].inner {
            TypeInner::Bool => Some(ScalarKind::Bool),
            TypeInner::Float { .. } => Some(ScalarKind::Float),
            TypeInner::Int { signed: true, .. } => Some(ScalarKind::Sint),
            TypeInner::Int { signed: false, .. } => Some(ScalarKind::Uint),
            TypeInner::Vector { elem, .. } => self.scalar_kind_of(elem),
            TypeInner::Matrix { column, .. } => self.scalar_kind_of(column),
            _ => None,
        }
    }

    fn lower_binary(
        &mut self,
        expr: Handle<ast::Expr>,
        op: BinaryOp,
        left: Handle<ast::Expr>,
        right: Handle<ast::Expr>,
    ) -> Option<Handle<Inst>> {
        let location = self.unit.exprs[expr].location;
        let result_ty = self.expr_type(expr)?;

        let left_value = self.lower_expr(left)?;
        let mut left_value = self.load_val(left_value);
        let right_value = self.lower_expr(right)?;
        let mut right_value = self.load_val(right_value);

        use BinaryOp::*;
        let arithmetic = matches!(op, Add | Subtract | Multiply | Divide | Modulo);
        let comparison = matches!(
            op,
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual
        );

        // Unify the scalar kinds first, then broadcast a scalar operand
        // over the vector side.
        if arithmetic || comparison {
            let unified_kind = match (
                self.scalar_kind_of(self.value_type(left_value)?),
                self.scalar_kind_of(self.value_type(right_value)?),
            ) {
                (Some(ScalarKind::Float), _) | (_, Some(ScalarKind::Float)) => ScalarKind::Float,
                (Some(kind), _) => kind,
                _ => {
                    self.internal(location);
                    return None;
                }
            };
            left_value = self.convert_scalar_kind(left_value, unified_kind);
            right_value = self.convert_scalar_kind(right_value, unified_kind);
        }

        if arithmetic || comparison {
            let left_is_vector = self.value_is_vector(left_value);
            let right_is_vector = self.value_is_vector(right_value);
            if left_is_vector && !right_is_vector {
                let target = self.value_type(left_value)?;
                right_value = self.splat(right_value, target);
            } else if right_is_vector && !left_is_vector {
                let target = self.value_type(right_value)?;
                left_value = self.splat(left_value, target);
            }
        }

        let elem_kind = self.scalar_kind_of(self.value_type(left_value)?);
        let signed = matches!(elem_kind, Some(ScalarKind::Sint));
        let spirv_op = match op {
            Add => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FAdd,
                _ => spirv::Op::IAdd,
            },
            Subtract => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FSub,
                _ => spirv::Op::ISub,
            },
            Multiply => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FMul,
                _ => spirv::Op::IMul,
            },
            Divide => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FDiv,
                Some(ScalarKind::Sint) => spirv::Op::SDiv,
                _ => spirv::Op::UDiv,
            },
            Modulo => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FMod,
                Some(ScalarKind::Sint) => spirv::Op::SMod,
                _ => spirv::Op::UMod,
            },
            Equal => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FOrdEqual,
                Some(ScalarKind::Bool) => spirv::Op::LogicalEqual,
                _ => spirv::Op::IEqual,
            },
            NotEqual => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FOrdNotEqual,
                Some(ScalarKind::Bool) => spirv::Op::LogicalNotEqual,
                _ => spirv::Op::INotEqual,
            },
            Less => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FOrdLessThan,
                _ if signed => spirv::Op::SLessThan,
                _ => spirv::Op::ULessThan,
            },
            LessEqual => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FOrdLessThanEqual,
                _ if signed => spirv::Op::SLessThanEqual,
                _ => spirv::Op::ULessThanEqual,
            },
            Greater => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FOrdGreaterThan,
                _ if signed => spirv::Op::SGreaterThan,
                _ => spirv::Op::UGreaterThan,
            },
            GreaterEqual => match elem_kind {
                Some(ScalarKind::Float) => spirv::Op::FOrdGreaterThanEqual,
                _ if signed => spirv::Op::SGreaterThanEqual,
                _ => spirv::Op::UGreaterThanEqual,
            },
            LogicalAnd => spirv::Op::LogicalAnd,
            LogicalOr => spirv::Op::LogicalOr,
            And => spirv::Op::BitwiseAnd,
            InclusiveOr => spirv::Op::BitwiseOr,
            ExclusiveOr => spirv::Op::BitwiseXor,
            ShiftLeft => spirv::Op::ShiftLeftLogical,
            ShiftRight => spirv::Op::ShiftRightLogical,
        };

        Some(self.push(
            Some(result_ty),
            InstKind::Binary {
                op: spirv_op,
                left: left_value,
                right: right_value,
            },
        ))
    }

    fn value_is_vector(&self, value: Handle<Inst>) -> bool {
        self.value_type(value)
            .map_or(false, |ty| matches!(self.module.types[ty].inner, TypeInner::Vector { .. }))
    }

    /// Cast a value so its scalar kind matches `kind`, keeping its shape.
    fn convert_scalar_kind(&mut self, value: Handle<Inst>, kind: ScalarKind) -> Handle<Inst> {
        let ty = match self.value_type(value) {
            Some(ty) => ty,
            None => return value,
        };
        if self.scalar_kind_of(ty) == Some(kind) {
            return value;
        }
        let target = match self.module.types[ty].inner {
            TypeInner::Vector { size, .. } => {
                let elem = self.scalar_of_kind(kind);
                self.module.type_vector(elem, size)
            }
            _ => self.scalar_of_kind(kind),
        };
        self.convert_value(value, target)
    }

    fn scalar_of_kind(&mut self, kind: ScalarKind) -> Handle<Type> {
        match kind {
            ScalarKind::Bool => self.module.type_bool(),
            ScalarKind::Float => self.module.type_float(4),
            ScalarKind::Sint => self.module.type_int(4, true),
            ScalarKind::Uint => self.module.type_int(4, false),
        }
    }

    /// Broadcast a scalar over a vector by repeated composite
    /// construction.
    fn splat(&mut self, value: Handle<Inst>, vector_ty: Handle<Type>) -> Handle<Inst> {
        let size = match self.module.types[vector_ty].inner {
            TypeInner::Vector { size, .. } => size,
            _ => return value,
        };
        let components = vec![value; size as usize];
        self.push(
            Some(vector_ty),
            InstKind::CompositeConstruct { components },
        )
    }

    //
    // Intrinsics
    //

    fn lower_intrinsic(
        &mut self,
        expr: Handle<ast::Expr>,
        op: Intrinsic,
        args: &[Handle<ast::Expr>],
    ) -> Option<Handle<Inst>> {
        use Intrinsic::*;

        if op.is_atomic() {
            return self.lower_atomic(expr, op, args);
        }

        let location = self.unit.exprs[expr].location;
        let result_ty = self.expr_type(expr)?;

        if op == Mul {
            return self.lower_mul(result_ty, args, location);
        }

        let mut values = Vec::with_capacity(args.len());
        for &arg in args {
            let value = self.lower_expr(arg)?;
            values.push(self.load_val(value));
        }

        let kind = self.scalar_kind_of(result_ty);
        let ext = match op {
            Sin => spirv::GLOp::Sin,
            Cos => spirv::GLOp::Cos,
            Tan => spirv::GLOp::Tan,
            Asin => spirv::GLOp::Asin,
            Acos => spirv::GLOp::Acos,
            Atan => spirv::GLOp::Atan,
            Sinh => spirv::GLOp::Sinh,
            Cosh => spirv::GLOp::Cosh,
            Tanh => spirv::GLOp::Tanh,
            Atan2 => spirv::GLOp::Atan2,
            Sqrt => spirv::GLOp::Sqrt,
            Rsqrt => spirv::GLOp::InverseSqrt,
            Exp => spirv::GLOp::Exp,
            Exp2 => spirv::GLOp::Exp2,
            Log => spirv::GLOp::Log,
            Log2 => spirv::GLOp::Log2,
            Floor => spirv::GLOp::Floor,
            Ceil => spirv::GLOp::Ceil,
            Trunc => spirv::GLOp::Trunc,
            Frac => spirv::GLOp::Fract,
            Degrees => spirv::GLOp::Degrees,
            Radians => spirv::GLOp::Radians,
            Pow => spirv::GLOp::Pow,
            Step => spirv::GLOp::Step,
            Reflect => spirv::GLOp::Reflect,
            Refract => spirv::GLOp::Refract,
            Lerp => spirv::GLOp::FMix,
            SmoothStep => spirv::GLOp::SmoothStep,
            Cross => spirv::GLOp::Cross,
            Length => spirv::GLOp::Length,
            Normalize => spirv::GLOp::Normalize,
            Distance => spirv::GLOp::Distance,
            Determinant => spirv::GLOp::Determinant,
            Abs => match kind {
                Some(ScalarKind::Float) => spirv::GLOp::FAbs,
                _ => spirv::GLOp::SAbs,
            },
            Min => match kind {
                Some(ScalarKind::Float) => spirv::GLOp::FMin,
                Some(ScalarKind::Sint) => spirv::GLOp::SMin,
                _ => spirv::GLOp::UMin,
            },
            Max => match kind {
                Some(ScalarKind::Float) => spirv::GLOp::FMax,
                Some(ScalarKind::Sint) => spirv::GLOp::SMax,
                _ => spirv::GLOp::UMax,
            },
            Clamp => match kind {
                Some(ScalarKind::Float) => spirv::GLOp::FClamp,
                Some(ScalarKind::Sint) => spirv::GLOp::SClamp,
                _ => spirv::GLOp::UClamp,
            },
            Dot => {
                return Some(self.push(
                    Some(result_ty),
                    InstKind::Binary {
                        op: spirv::Op::Dot,
                        left: values[0],
                        right: values[1],
                    },
                ))
            }
            Transpose => {
                return Some(self.push(
                    Some(result_ty),
                    InstKind::Unary {
                        op: spirv::Op::Transpose,
                        expr: values[0],
                    },
                ))
            }
            Ddx => {
                return Some(self.push(
                    Some(result_ty),
                    InstKind::Unary {
                        op: spirv::Op::DPdx,
                        expr: values[0],
                    },
                ))
            }
            Ddy => {
                return Some(self.push(
                    Some(result_ty),
                    InstKind::Unary {
                        op: spirv::Op::DPdy,
                        expr: values[0],
                    },
                ))
            }
            AsFloat | AsInt | AsUint => {
                return Some(self.push(
                    Some(result_ty),
                    InstKind::Unary {
                        op: spirv::Op::Bitcast,
                        expr: values[0],
                    },
                ))
            }
            Mul | InterlockedAdd | InterlockedAnd | InterlockedOr | InterlockedXor
            | InterlockedMin | InterlockedMax | InterlockedExchange
            | InterlockedCompareExchange | InterlockedCompareStore => {
                self.internal(location);
                return None;
            }
        };

        Some(self.push(
            Some(result_ty),
            InstKind::ExtInst {
                op: ext,
                arguments: values,
            },
        ))
    }

    /// `mul` dispatch by operand shape; SPIR-V's matrix multiply operand
    /// order is the reverse of HLSL's.
    fn lower_mul(
        &mut self,
        result_ty: Handle<Type>,
        args: &[Handle<ast::Expr>],
        location: Location,
    ) -> Option<Handle<Inst>> {
        let a = self.lower_expr(args[0])?;
        let a = self.load_val(a);
        let b = self.lower_expr(args[1])?;
        let b = self.load_val(b);

        let a_inner = &self.module.types[self.value_type(a)?].inner;
        let b_inner = &self.module.types[self.value_type(b)?].inner;

        let (op, left, right) = match (a_inner, b_inner) {
            (&TypeInner::Vector { .. }, &TypeInner::Matrix { .. }) => {
                (spirv::Op::MatrixTimesVector, b, a)
            }
            (&TypeInner::Matrix { .. }, &TypeInner::Vector { .. }) => {
                (spirv::Op::VectorTimesMatrix, b, a)
            }
            (&TypeInner::Matrix { .. }, &TypeInner::Matrix { .. }) => {
                (spirv::Op::MatrixTimesMatrix, b, a)
            }
            (&TypeInner::Vector { .. }, &TypeInner::Vector { .. }) => (spirv::Op::Dot, a, b),
            (&TypeInner::Float { .. }, &TypeInner::Float { .. }) => (spirv::Op::FMul, a, b),
            (&TypeInner::Int { .. }, &TypeInner::Int { .. }) => (spirv::Op::IMul, a, b),
            _ => {
                self.internal(location);
                return None;
            }
        };

        Some(self.push(Some(result_ty), InstKind::Binary { op, left, right }))
    }

    fn lower_atomic(
        &mut self,
        expr: Handle<ast::Expr>,
        op: Intrinsic,
        args: &[Handle<ast::Expr>],
    ) -> Option<Handle<Inst>> {
        use Intrinsic::*;

        let location = self.unit.exprs[expr].location;
        let pointer = self.lower_expr(args[0])?;
        if !self.is_lvalue(pointer) {
            self.internal(location);
            return None;
        }
        let pointee = self
            .value_type(pointer)
            .and_then(|ty| self.module.pointer_base(ty))?;
        let signed = matches!(
            self.module.types[pointee].inner,
            TypeInner::Int { signed: true, .. }
        );

        let scope = self.module.const_uint(spirv::Scope::Device as u32);
        let relaxed = self
            .module
            .const_uint(spirv::MemorySemantics::NONE.bits());

        let spirv_op = match op {
            InterlockedAdd => spirv::Op::AtomicIAdd,
            InterlockedAnd => spirv::Op::AtomicAnd,
            InterlockedOr => spirv::Op::AtomicOr,
            InterlockedXor => spirv::Op::AtomicXor,
            InterlockedMin if signed => spirv::Op::AtomicSMin,
            InterlockedMin => spirv::Op::AtomicUMin,
            InterlockedMax if signed => spirv::Op::AtomicSMax,
            InterlockedMax => spirv::Op::AtomicUMax,
            InterlockedExchange => spirv::Op::AtomicExchange,
            InterlockedCompareExchange | InterlockedCompareStore => {
                spirv::Op::AtomicCompareExchange
            }
            _ => {
                self.internal(location);
                return None;
            }
        };

        match op {
            InterlockedCompareExchange | InterlockedCompareStore => {
                let compare = self.lower_expr(args[1])?;
                let compare = self.load_val(compare);
                let compare = self.convert_value(compare, pointee);
                let value = self.lower_expr(args[2])?;
                let value = self.load_val(value);
                let value = self.convert_value(value, pointee);
                let atomic = self.push(
                    Some(pointee),
                    InstKind::Atomic {
                        op: spirv_op,
                        pointer,
                        scope,
                        semantics: vec![relaxed, relaxed],
                        operands: vec![value, compare],
                    },
                );
                if op == InterlockedCompareExchange {
                    let original = self.lower_expr(args[3])?;
                    if self.is_lvalue(original) {
                        self.store(original, atomic);
                    }
                }
                Some(atomic)
            }
            InterlockedExchange => {
                let value = self.lower_expr(args[1])?;
                let value = self.load_val(value);
                let value = self.convert_value(value, pointee);
                let atomic = self.push(
                    Some(pointee),
                    InstKind::Atomic {
                        op: spirv_op,
                        pointer,
                        scope,
                        semantics: vec![relaxed],
                        operands: vec![value],
                    },
                );
                let original = self.lower_expr(args[2])?;
                if self.is_lvalue(original) {
                    self.store(original, atomic);
                }
                Some(atomic)
            }
            _ => {
                let value = self.lower_expr(args[1])?;
                let value = self.load_val(value);
                let value = self.convert_value(value, pointee);
                Some(self.push(
                    Some(pointee),
                    InstKind::Atomic {
                        op: spirv_op,
                        pointer,
                        scope,
                        semantics: vec![relaxed],
                        operands: vec![value],
                    },
                ))
            }
        }
    }

    //
    // Entry point adapter
    //

    /// The outer `void()` function SPIR-V sees as the entry point: it
    /// loads every stage input into a local matching the user parameter,
    /// calls the user function in its original shape, and scatters the
    /// results into the stage outputs.
    fn build_entry_wrapper(
        &mut self,
        input_vars: Vec<Handle<Inst>>,
        output_vars: Vec<Handle<Inst>>,
    ) {
        let entry = match self.unit.entry_point {
            Some(ref entry) => entry,
            None => return,
        };
        let user_decl = entry.function;
        let stage = entry.stage;
        let workgroup_size = entry.workgroup_size;
        let name = self.unit.decls[user_decl].name.clone();
        let inputs: Vec<IoOrigin> = entry.inputs.iter().map(|io| io.origin).collect();
        let outputs: Vec<IoOrigin> = entry.outputs.iter().map(|io| io.origin).collect();

        let user_function = match self.decl_values.get(&user_decl) {
            Some(&function) => function,
            None => return,
        };
        let params = match self.unit.decls[user_decl].kind {
            DeclKind::Function(ref function) => function.params.clone(),
            _ => return,
        };

        let void = self.module.type_void();
        let wrapper_ty = self.module.type_function(void, Vec::new());
        let wrapper = self.module.add_function(wrapper_ty);
        self.current_function = Some(wrapper);
        let entry_block = self.module.create_block();
        self.position_at_end(entry_block);
        self.attach(entry_block);

        // One local per user parameter.
        let mut slots = Vec::with_capacity(params.len());
        for &param in &params {
            let ty = self.unit.decls[param].ty.and_then(|t| self.convert_type(t));
            match ty {
                Some(ty) => slots.push(Some(self.alloca(ty))),
                None => slots.push(None),
            }
        }

        // Gather stage inputs.
        for (&var, &origin) in input_vars.iter().zip(&inputs) {
            let loaded = self.load_val(var);
            match origin {
                IoOrigin::Param(index) => {
                    if let Some(Some(slot)) = slots.get(index) {
                        self.store(*slot, loaded);
                    }
                }
                IoOrigin::ParamMember(index, member) => {
                    if let Some(&Some(slot)) = slots.get(index) {
                        if let Some(member_ty) = self.value_type(loaded) {
                            let index_const = self.module.const_uint(member);
                            let pointer =
                                self.access_chain(member_ty, slot, vec![index_const]);
                            self.store(pointer, loaded);
                        }
                    }
                }
                _ => {}
            }
        }

        // Call the user function in its original shape.
        let mut arguments = Vec::with_capacity(params.len());
        for (&param, slot) in params.iter().zip(&slots) {
            let slot = match slot {
                Some(slot) => *slot,
                None => continue,
            };
            let by_reference = match self.unit.decls[param].kind {
                DeclKind::Var(ref var) => var.kind.is_by_reference(),
                _ => false,
            };
            if by_reference {
                arguments.push(slot);
            } else {
                arguments.push(self.load_val(slot));
            }
        }
        let user_ret = match self.unit.decls[user_decl].ty {
            Some(ty) => match self.unit.types[ty].inner {
                ast::TypeInner::Function { ret, .. } => self.convert_type(ret),
                _ => None,
            },
            None => None,
        };
        let call = self.push(
            user_ret,
            InstKind::Call {
                function: user_function,
                arguments,
            },
        );

        // Scatter stage outputs.
        for (&var, &origin) in output_vars.iter().zip(&outputs) {
            let out_ty = self
                .value_type(var)
                .and_then(|ty| self.module.pointer_base(ty));
            let value = match origin {
                IoOrigin::ReturnValue => Some(call),
                IoOrigin::ReturnMember(member) => out_ty.map(|ty| {
                    self.push(
                        Some(ty),
                        InstKind::CompositeExtract {
                            value: call,
                            indices: vec![member],
                        },
                    )
                }),
                IoOrigin::OutParam(index) => match slots.get(index) {
                    Some(&Some(slot)) => Some(self.load_val(slot)),
                    _ => None,
                },
                IoOrigin::OutParamMember(index, member) => match (slots.get(index), out_ty) {
                    (Some(&Some(slot)), Some(ty)) => {
                        let index_const = self.module.const_uint(member);
                        let pointer = self.access_chain(ty, slot, vec![index_const]);
                        Some(self.load_val(pointer))
                    }
                    _ => None,
                },
                _ => None,
            };
            if let Some(value) = value {
                self.store(var, value);
            }
        }

        self.push(None, InstKind::Return { value: None });
        self.current_function = None;
        self.current_block = None;

        let mut interface = input_vars;
        interface.extend(output_vars);
        self.module.entry_points.push(EntryPoint {
            name,
            stage,
            function: wrapper,
            workgroup_size,
            interface,
        });
    }
}
