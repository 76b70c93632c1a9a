//! Semantic analysis.
//!
//! Two passes over the declaration list: the first registers struct types,
//! resource globals (with descriptor set / binding assignment), constants
//! and function signatures; the second walks every function body resolving
//! identifiers, inferring expression types and validating operations. The
//! requested entry point additionally has its parameters and return value
//! split into per-member stage inputs and outputs, each decorated with
//! either a SPIR-V builtin or a location.

use super::{
    ast::*,
    intrinsics::Intrinsic,
    layout,
};
use crate::{
    arena::Handle,
    Bytes, Decoration, Diagnostics, FastHashMap, Location, ScalarKind, ShaderStage,
};

struct Analyzer<'a> {
    unit: &'a mut TranslationUnit,
    diagnostics: &'a mut Diagnostics,
    entry_point: &'a str,
    stage: ShaderStage,

    scopes: Vec<FastHashMap<String, Handle<Decl>>>,
    loop_depth: u32,
    current_return: Option<Handle<Type>>,
    current_locals: Vec<Handle<Decl>>,
    /// Auto-incremented binding index for resources without an explicit
    /// `register`.
    next_binding: u32,
}

/// Run semantic analysis over a parsed translation unit.
pub fn analyze(
    unit: &mut TranslationUnit,
    entry_point: &str,
    stage: ShaderStage,
    diagnostics: &mut Diagnostics,
) {
    let mut analyzer = Analyzer {
        unit,
        diagnostics,
        entry_point,
        stage,
        scopes: vec![FastHashMap::default()],
        loop_depth: 0,
        current_return: None,
        current_locals: Vec::new(),
        next_binding: 0,
    };
    analyzer.collect_globals();
    analyzer.analyze_functions();

    if analyzer.unit.entry_point.is_none() && analyzer.diagnostics.is_empty() {
        analyzer.diagnostics.add(
            Location::default(),
            format!("entry point `{}` not found", entry_point),
        );
    }
}

impl<'a> Analyzer<'a> {
    //
    // Scope handling
    //

    fn declare(&mut self, name: &str, decl: Handle<Decl>, location: Location) {
        let scope = match self.scopes.last_mut() {
            Some(scope) => scope,
            None => return,
        };
        if scope.insert(name.to_string(), decl).is_some() {
            self.diagnostics
                .add(location, format!("redefinition of `{}`", name));
        }
    }

    fn lookup(&self, name: &str) -> Option<Handle<Decl>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    //
    // Type helpers
    //

    fn intern(&mut self, name: Option<String>, inner: TypeInner) -> Handle<Type> {
        self.unit.types.fetch_or_append(Type { name, inner })
    }

    fn type_void(&mut self) -> Handle<Type> {
        self.intern(None, TypeInner::Void)
    }

    fn type_meta(&mut self) -> Handle<Type> {
        self.intern(None, TypeInner::Meta)
    }

    fn type_scalar(&mut self, kind: ScalarKind) -> Handle<Type> {
        let width: Bytes = if kind == ScalarKind::Bool { 1 } else { 4 };
        self.intern(None, TypeInner::Scalar { kind, width })
    }

    fn type_vector(&mut self, kind: ScalarKind, size: u32) -> Handle<Type> {
        let elem = self.type_scalar(kind);
        self.intern(None, TypeInner::Vector { elem, size })
    }

    /// The scalar kind of a scalar, vector or matrix type.
    fn scalar_kind(&self, ty: Handle<Type>) -> Option<ScalarKind> {
        match self.unit.types[ty].inner {
            TypeInner::Scalar { kind, .. } => Some(kind),
            TypeInner::Vector { elem, .. } => self.scalar_kind(elem),
            TypeInner::Matrix { column, .. } => self.scalar_kind(column),
            _ => None,
        }
    }

    fn vector_size(&self, ty: Handle<Type>) -> Option<u32> {
        match self.unit.types[ty].inner {
            TypeInner::Vector { size, .. } => Some(size),
            _ => None,
        }
    }

    fn is_scalar(&self, ty: Handle<Type>) -> bool {
        matches!(self.unit.types[ty].inner, TypeInner::Scalar { .. })
    }

    fn is_numeric_scalar(&self, ty: Handle<Type>) -> bool {
        matches!(
            self.unit.types[ty].inner,
            TypeInner::Scalar { kind, .. } if kind != ScalarKind::Bool
        )
    }

    fn is_integer_scalar(&self, ty: Handle<Type>) -> bool {
        matches!(
            self.unit.types[ty].inner,
            TypeInner::Scalar {
                kind: ScalarKind::Sint,
                ..
            } | TypeInner::Scalar {
                kind: ScalarKind::Uint,
                ..
            }
        )
    }

    /// Number of scalar components this type contributes to a composite
    /// constructor.
    fn component_count(&self, ty: Handle<Type>) -> Option<u32> {
        match self.unit.types[ty].inner {
            TypeInner::Scalar { .. } => Some(1),
            TypeInner::Vector { size, .. } => Some(size),
            _ => None,
        }
    }

    /// Map a type to the same shape over a different scalar kind.
    fn with_scalar_kind(&mut self, ty: Handle<Type>, kind: ScalarKind) -> Handle<Type> {
        match self.unit.types[ty].inner {
            TypeInner::Scalar { .. } => self.type_scalar(kind),
            TypeInner::Vector { size, .. } => self.type_vector(kind, size),
            _ => ty,
        }
    }

    /// The struct type accessible through `ty`, looking through constant
    /// buffer wrappers.
    fn as_struct(&self, ty: Handle<Type>) -> Option<Handle<Type>> {
        match self.unit.types[ty].inner {
            TypeInner::Struct { .. } => Some(ty),
            TypeInner::ConstantBuffer { base } => self.as_struct(base),
            _ => None,
        }
    }

    fn type_name(&self, ty: Handle<Type>) -> String {
        match self.unit.types[ty].inner {
            TypeInner::Void => "void".to_string(),
            TypeInner::Meta => "type".to_string(),
            TypeInner::Scalar { kind, .. } => scalar_name(kind).to_string(),
            TypeInner::Vector { elem, size } => {
                format!("{}{}", self.type_name(elem), size)
            }
            TypeInner::Matrix { columns, column } => match self.unit.types[column].inner {
                TypeInner::Vector { elem, size } => {
                    format!("{}{}x{}", self.type_name(elem), size, columns)
                }
                _ => "matrix".to_string(),
            },
            TypeInner::Struct { .. } => self.unit.types[ty]
                .name
                .clone()
                .unwrap_or_else(|| "struct".to_string()),
            TypeInner::Sampler => "SamplerState".to_string(),
            TypeInner::Image { .. } => "texture".to_string(),
            TypeInner::SampledImage { .. } => "sampled texture".to_string(),
            TypeInner::ConstantBuffer { .. } => "ConstantBuffer".to_string(),
            TypeInner::StructuredBuffer { .. } => "StructuredBuffer".to_string(),
            TypeInner::RwStructuredBuffer { .. } => "RWStructuredBuffer".to_string(),
            TypeInner::Pointer { .. } => "pointer".to_string(),
            TypeInner::Function { .. } => "function".to_string(),
        }
    }

    //
    // Pass 1: global registration
    //

    fn collect_globals(&mut self) {
        let globals = self.unit.globals.clone();
        for decl in globals {
            match self.unit.decls[decl].kind {
                DeclKind::Struct(_) => self.register_struct(decl),
                DeclKind::Var(_) => self.register_global_var(decl),
                DeclKind::Const(_) => self.register_const(decl),
                DeclKind::Function(_) => self.register_function(decl),
                DeclKind::Field(_) => {}
            }
        }
    }

    fn register_struct(&mut self, decl: Handle<Decl>) {
        let (name, location, fields) = match self.unit.decls[decl] {
            Decl {
                ref name,
                location,
                kind: DeclKind::Struct(ref body),
                ..
            } => (name.clone(), location, body.fields.clone()),
            _ => return,
        };

        let mut member_types = Vec::with_capacity(fields.len());
        let mut members = Vec::with_capacity(fields.len());
        for &field in &fields {
            let (field_name, ty_expr, semantic) = match self.unit.decls[field] {
                Decl {
                    ref name,
                    kind: DeclKind::Field(ref fd),
                    ..
                } => (name.clone(), fd.ty_expr, fd.semantic.clone()),
                _ => continue,
            };
            let ty = match self.resolve_type_expr(ty_expr) {
                Some(ty) => ty,
                None => continue,
            };
            self.unit.decls.get_mut(field).ty = Some(ty);
            member_types.push(ty);
            members.push((field_name, ty, semantic));
        }

        let offsets = layout::member_offsets(&self.unit.types, &member_types);
        let members = members
            .into_iter()
            .zip(offsets)
            .map(|((name, ty, semantic), offset)| StructMember {
                name,
                ty,
                semantic,
                offset,
            })
            .collect();

        let ty = self.intern(
            Some(name.clone()),
            TypeInner::Struct { decl, members },
        );
        self.unit.decls.get_mut(decl).ty = Some(ty);
        self.declare(&name, decl, location);
    }

    fn register_global_var(&mut self, decl: Handle<Decl>) {
        let (name, location, var_kind, ty_expr, register, from_cbuffer) =
            match self.unit.decls[decl] {
                Decl {
                    ref name,
                    location,
                    kind: DeclKind::Var(ref var),
                    ..
                } => (
                    name.clone(),
                    location,
                    var.kind,
                    var.ty_expr,
                    var.register,
                    var.from_cbuffer,
                ),
                _ => return,
            };

        let ty = match self.resolve_type_expr(ty_expr) {
            Some(ty) => ty,
            None => return,
        };
        self.unit.decls.get_mut(decl).ty = Some(ty);

        let is_resource = match self.unit.types[ty].inner {
            TypeInner::Sampler
            | TypeInner::Image { .. }
            | TypeInner::ConstantBuffer { .. }
            | TypeInner::StructuredBuffer { .. }
            | TypeInner::RwStructuredBuffer { .. } => true,
            _ => false,
        };

        match var_kind {
            VarKind::GroupShared => {
                if is_resource {
                    self.diagnostics.add(
                        location,
                        "`groupshared` variables cannot have a resource type".to_string(),
                    );
                }
            }
            _ => {
                if !is_resource {
                    self.diagnostics.add(
                        location,
                        format!(
                            "global `{}` must be a shader resource or `static const`",
                            name
                        ),
                    );
                    return;
                }
                let (set, binding) = match register {
                    Some(register) => (register.space, register.index),
                    None => {
                        let binding = self.next_binding;
                        self.next_binding += 1;
                        (0, binding)
                    }
                };
                let decorations = &mut self.unit.decls.get_mut(decl).decorations;
                decorations.push(Decoration::with(
                    spirv::Decoration::DescriptorSet,
                    set,
                ));
                decorations.push(Decoration::with(spirv::Decoration::Binding, binding));
            }
        }

        // A `cbuffer` itself is not a referenceable value; only its
        // members enter the global scope.
        if !from_cbuffer {
            self.declare(&name, decl, location);
        }

        if from_cbuffer {
            if let Some(st) = self.as_struct(ty) {
                if let TypeInner::Struct {
                    decl: struct_decl, ..
                } = self.unit.types[st].inner
                {
                    let fields = match self.unit.decls[struct_decl].kind {
                        DeclKind::Struct(ref body) => body.fields.clone(),
                        _ => Vec::new(),
                    };
                    for (index, &field) in fields.iter().enumerate() {
                        let field_name = self.unit.decls[field].name.clone();
                        let field_location = self.unit.decls[field].location;
                        self.declare(&field_name, field, field_location);
                        self.unit
                            .cbuffer_members
                            .insert(field, (decl, index as u32));
                    }
                }
            }
        }
    }

    fn register_const(&mut self, decl: Handle<Decl>) {
        let (name, location, ty_expr, init) = match self.unit.decls[decl] {
            Decl {
                ref name,
                location,
                kind: DeclKind::Const(ref constant),
                ..
            } => (name.clone(), location, constant.ty_expr, constant.init),
            _ => return,
        };

        let ty = match self.resolve_type_expr(ty_expr) {
            Some(ty) => ty,
            None => return,
        };
        self.unit.decls.get_mut(decl).ty = Some(ty);

        if self.expr(init, Some(ty)).is_some() && !self.is_const_foldable(init) {
            self.diagnostics.add(
                location,
                "constant initializer must be a literal or a foldable integer expression"
                    .to_string(),
            );
        }
        self.declare(&name, decl, location);
    }

    fn is_const_foldable(&self, expr: Handle<Expr>) -> bool {
        if self.unit.exprs[expr].const_int.is_some() {
            return true;
        }
        match self.unit.exprs[expr].kind {
            ExprKind::Literal(_) => true,
            ExprKind::Unary {
                op: UnaryOp::Negate,
                expr,
            } => matches!(self.unit.exprs[expr].kind, ExprKind::Literal(_)),
            _ => false,
        }
    }

    fn register_function(&mut self, decl: Handle<Decl>) {
        let (name, location, params, return_ty_expr) = match self.unit.decls[decl] {
            Decl {
                ref name,
                location,
                kind: DeclKind::Function(ref function),
                ..
            } => (
                name.clone(),
                location,
                function.params.clone(),
                function.return_ty,
            ),
            _ => return,
        };

        let mut param_types = Vec::with_capacity(params.len());
        for &param in &params {
            let (ty_expr, by_reference) = match self.unit.decls[param].kind {
                DeclKind::Var(ref var) => (var.ty_expr, var.kind.is_by_reference()),
                _ => continue,
            };
            let ty = match self.resolve_type_expr(ty_expr) {
                Some(ty) => ty,
                None => continue,
            };
            self.unit.decls.get_mut(param).ty = Some(ty);
            let passed = if by_reference {
                self.intern(
                    None,
                    TypeInner::Pointer {
                        class: spirv::StorageClass::Function,
                        base: ty,
                    },
                )
            } else {
                ty
            };
            param_types.push(passed);
        }

        let ret = self
            .resolve_type_expr(return_ty_expr)
            .unwrap_or_else(|| self.type_void());
        let ty = self.intern(
            None,
            TypeInner::Function {
                ret,
                params: param_types,
            },
        );
        self.unit.decls.get_mut(decl).ty = Some(ty);
        self.declare(&name, decl, location);
    }

    //
    // Pass 2: function bodies
    //

    fn analyze_functions(&mut self) {
        let globals = self.unit.globals.clone();
        for decl in globals {
            if let DeclKind::Function(_) = self.unit.decls[decl].kind {
                self.analyze_function(decl);
            }
        }
    }

    fn analyze_function(&mut self, decl: Handle<Decl>) {
        let (name, location, params, body) = match self.unit.decls[decl] {
            Decl {
                ref name,
                location,
                kind: DeclKind::Function(ref function),
                ..
            } => (
                name.clone(),
                location,
                function.params.clone(),
                function.body.clone(),
            ),
            _ => return,
        };

        let ret = match self.unit.decls[decl].ty {
            Some(ty) => match self.unit.types[ty].inner {
                TypeInner::Function { ret, .. } => ret,
                _ => return,
            },
            None => return,
        };

        self.current_return = Some(ret);
        self.current_locals = Vec::new();
        self.scopes.push(FastHashMap::default());

        for &param in &params {
            let param_name = self.unit.decls[param].name.clone();
            let param_location = self.unit.decls[param].location;
            self.declare(&param_name, param, param_location);
        }

        for &stmt in &body {
            self.stmt(stmt);
        }

        // A value-returning function whose top-level statement list can
        // run off the end is missing a return. Bodies ending in control
        // flow are left to the driver's SPIR-V validation.
        let void = self.type_void();
        if ret != void {
            let tail_returns = body.last().map_or(false, |&stmt| {
                matches!(
                    self.unit.stmts[stmt].kind,
                    StmtKind::Return(_) | StmtKind::If { .. }
                )
            });
            if !tail_returns {
                self.diagnostics.add(
                    location,
                    format!("function `{}` is missing a return statement", name),
                );
            }
        }

        self.scopes.pop();
        let locals = std::mem::take(&mut self.current_locals);
        if let DeclKind::Function(ref mut function) = self.unit.decls.get_mut(decl).kind {
            function.locals = locals;
        }
        self.current_return = None;

        if name == self.entry_point {
            if let DeclKind::Function(ref mut function) = self.unit.decls.get_mut(decl).kind {
                function.called = true;
            }
            self.build_entry_point(decl, ret);
        }
    }

    //
    // Statements
    //

    fn stmt(&mut self, stmt: Handle<Stmt>) {
        let location = self.unit.stmts[stmt].location;
        match self.unit.stmts[stmt].kind {
            StmtKind::Decl(decl) => self.local_decl(decl),
            StmtKind::Expr(expr) => {
                let _ = self.expr(expr, None);
            }
            StmtKind::Assign { target, value } => {
                let target_ty = self.expr(target, None);
                if let Some(target_ty) = target_ty {
                    if !self.unit.exprs[target].assignable {
                        self.diagnostics.add(
                            self.unit.exprs[target].location,
                            "left-hand side of assignment is not assignable".to_string(),
                        );
                    }
                    if let Some(value_ty) = self.expr(value, Some(target_ty)) {
                        self.check_assignable_types(location, target_ty, value_ty);
                    }
                } else {
                    let _ = self.expr(value, None);
                }
            }
            StmtKind::Return(value) => {
                let ret = match self.current_return {
                    Some(ret) => ret,
                    None => return,
                };
                let void = self.type_void();
                match value {
                    Some(value) => {
                        if ret == void {
                            self.diagnostics.add(
                                location,
                                "cannot return a value from a void function".to_string(),
                            );
                        } else if let Some(value_ty) = self.expr(value, Some(ret)) {
                            self.check_assignable_types(location, ret, value_ty);
                        }
                    }
                    None => {
                        if ret != void {
                            self.diagnostics
                                .add(location, "return value expected".to_string());
                        }
                    }
                }
            }
            StmtKind::Discard => {
                if self.stage != ShaderStage::Fragment {
                    self.diagnostics.add(
                        location,
                        "`discard` is only allowed in fragment shaders".to_string(),
                    );
                }
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.diagnostics
                        .add(location, "`break` outside of a loop".to_string());
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.diagnostics
                        .add(location, "`continue` outside of a loop".to_string());
                }
            }
            StmtKind::Block(ref stmts) => {
                let stmts = stmts.clone();
                self.scopes.push(FastHashMap::default());
                for stmt in stmts {
                    self.stmt(stmt);
                }
                self.scopes.pop();
            }
            StmtKind::If {
                condition,
                accept,
                reject,
            } => {
                self.condition(condition);
                self.stmt(accept);
                if let Some(reject) = reject {
                    self.stmt(reject);
                }
            }
            StmtKind::While { condition, body } => {
                self.condition(condition);
                self.loop_depth += 1;
                self.stmt(body);
                self.loop_depth -= 1;
            }
            StmtKind::DoWhile { body, condition } => {
                self.loop_depth += 1;
                self.stmt(body);
                self.loop_depth -= 1;
                self.condition(condition);
            }
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                self.scopes.push(FastHashMap::default());
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(condition) = condition {
                    self.condition(condition);
                }
                if let Some(step) = step {
                    self.stmt(step);
                }
                self.loop_depth += 1;
                self.stmt(body);
                self.loop_depth -= 1;
                self.scopes.pop();
            }
        }
    }

    /// A loop or `if` condition: a scalar that can be tested against zero.
    fn condition(&mut self, expr: Handle<Expr>) {
        let bool_ty = self.type_scalar(ScalarKind::Bool);
        if let Some(ty) = self.expr(expr, Some(bool_ty)) {
            if !self.is_scalar(ty) {
                self.diagnostics.add(
                    self.unit.exprs[expr].location,
                    "condition must be a scalar".to_string(),
                );
            }
        }
    }

    fn local_decl(&mut self, decl: Handle<Decl>) {
        match self.unit.decls[decl].kind {
            DeclKind::Var(_) => {}
            DeclKind::Const(_) => {
                self.register_const(decl);
                return;
            }
            _ => return,
        }

        let (name, location, ty_expr, init) = match self.unit.decls[decl] {
            Decl {
                ref name,
                location,
                kind: DeclKind::Var(ref var),
                ..
            } => (name.clone(), location, var.ty_expr, var.init),
            _ => return,
        };

        let ty = match self.resolve_type_expr(ty_expr) {
            Some(ty) => ty,
            None => return,
        };

        match self.unit.types[ty].inner {
            TypeInner::Scalar { .. }
            | TypeInner::Vector { .. }
            | TypeInner::Matrix { .. }
            | TypeInner::Struct { .. } => {}
            _ => {
                self.diagnostics.add(
                    location,
                    format!("`{}` is not a valid type for a local variable", self.type_name(ty)),
                );
                return;
            }
        }

        self.unit.decls.get_mut(decl).ty = Some(ty);
        if let Some(init) = init {
            if let Some(init_ty) = self.expr(init, Some(ty)) {
                self.check_assignable_types(location, ty, init_ty);
            }
        }
        self.declare(&name, decl, location);
        self.current_locals.push(decl);
    }

    /// Whether `value_ty` can be stored into `target_ty`, allowing the
    /// implicit scalar conversions that lowering knows how to emit.
    fn check_assignable_types(
        &mut self,
        location: Location,
        target_ty: Handle<Type>,
        value_ty: Handle<Type>,
    ) {
        if target_ty == value_ty {
            return;
        }
        if self.is_numeric_scalar(target_ty) && self.is_numeric_scalar(value_ty) {
            return;
        }
        self.diagnostics.add(
            location,
            format!(
                "mismatched types: expected `{}`, found `{}`",
                self.type_name(target_ty),
                self.type_name(value_ty)
            ),
        );
    }

    //
    // Type expressions
    //

    fn resolve_type_expr(&mut self, expr: Handle<Expr>) -> Option<Handle<Type>> {
        let location = self.unit.exprs[expr].location;
        let ty = match self.unit.exprs[expr].kind {
            ExprKind::TypeRef(ref type_ref) => {
                let type_ref = type_ref.clone();
                self.build_type(location, type_ref)?
            }
            ExprKind::Ident { ref name, .. } => {
                let name = name.clone();
                let decl = match self.lookup(&name) {
                    Some(decl) => decl,
                    None => {
                        self.diagnostics
                            .add(location, format!("unknown type `{}`", name));
                        return None;
                    }
                };
                match self.unit.decls[decl].kind {
                    DeclKind::Struct(_) => {
                        if let ExprKind::Ident {
                            decl: ref mut slot, ..
                        } = self.unit.exprs.get_mut(expr).kind
                        {
                            *slot = Some(decl);
                        }
                        match self.unit.decls[decl].ty {
                            Some(ty) => ty,
                            None => return None,
                        }
                    }
                    _ => {
                        self.diagnostics
                            .add(location, format!("`{}` does not name a type", name));
                        return None;
                    }
                }
            }
            _ => {
                self.diagnostics
                    .add(location, "expected a type".to_string());
                return None;
            }
        };

        let meta = self.type_meta();
        let node = self.unit.exprs.get_mut(expr);
        node.ty = Some(meta);
        node.as_type = Some(ty);
        Some(ty)
    }

    fn build_type(&mut self, location: Location, type_ref: TypeRef) -> Option<Handle<Type>> {
        Some(match type_ref {
            TypeRef::Void => self.type_void(),
            TypeRef::Scalar { kind, .. } => self.type_scalar(kind),
            TypeRef::Vector { kind, size, .. } => self.type_vector(kind, size),
            TypeRef::Matrix {
                kind,
                rows,
                columns,
                ..
            } => {
                let column = self.type_vector(kind, rows);
                self.intern(None, TypeInner::Matrix { columns, column })
            }
            TypeRef::Sampler => self.intern(None, TypeInner::Sampler),
            TypeRef::Texture { dim, sampled } => {
                let sampled = match sampled {
                    Some(expr) => self.resolve_type_expr(expr)?,
                    None => self.type_vector(ScalarKind::Float, 4),
                };
                self.intern(None, TypeInner::Image { sampled, dim })
            }
            TypeRef::ConstantBuffer { base } => {
                let base = self.resolve_type_expr(base)?;
                if self.as_struct(base).is_none() {
                    self.diagnostics.add(
                        location,
                        "`ConstantBuffer` requires a struct type argument".to_string(),
                    );
                    return None;
                }
                self.intern(None, TypeInner::ConstantBuffer { base })
            }
            TypeRef::StructuredBuffer { base, read_write } => {
                let base = self.resolve_type_expr(base)?;
                if read_write {
                    self.intern(None, TypeInner::RwStructuredBuffer { base })
                } else {
                    self.intern(None, TypeInner::StructuredBuffer { base })
                }
            }
        })
    }

    //
    // Expressions
    //

    fn expr(&mut self, expr: Handle<Expr>, expected: Option<Handle<Type>>) -> Option<Handle<Type>> {
        let location = self.unit.exprs[expr].location;
        match self.unit.exprs[expr].kind {
            ExprKind::Literal(ref literal) => {
                let literal = literal.clone();
                self.literal(expr, literal, expected)
            }
            ExprKind::Ident { ref name, .. } => {
                let name = name.clone();
                self.ident(expr, &name, location)
            }
            ExprKind::Access { base, ref chain } => {
                let chain = chain.clone();
                self.access(expr, base, &chain)
            }
            ExprKind::Subscript { base, index } => self.subscript(expr, base, index, location),
            ExprKind::TypeRef(_) => {
                self.resolve_type_expr(expr)?;
                self.unit.exprs[expr].ty
            }
            ExprKind::Call {
                callee,
                ref args,
                object,
            } => {
                let args = args.clone();
                self.call(expr, callee, &args, object, location)
            }
            ExprKind::IntrinsicCall { op, ref args } => {
                let args = args.clone();
                self.intrinsic_call(expr, op, &args, location)
            }
            ExprKind::BarrierCall { .. } => {
                let void = self.type_void();
                self.unit.exprs.get_mut(expr).ty = Some(void);
                Some(void)
            }
            ExprKind::Unary { op, expr: operand } => self.unary(expr, op, operand, location),
            ExprKind::Binary { op, left, right } => self.binary(expr, op, left, right, location),
        }
    }

    fn literal(
        &mut self,
        expr: Handle<Expr>,
        literal: Literal,
        expected: Option<Handle<Type>>,
    ) -> Option<Handle<Type>> {
        let ty = match literal {
            Literal::Bool(_) => self.type_scalar(ScalarKind::Bool),
            Literal::Float(_) => self.type_scalar(ScalarKind::Float),
            Literal::Int(value) => {
                // An integer literal adopts the expected scalar kind, which
                // is how `float x = 1;` works without an explicit cast.
                let kind = expected
                    .and_then(|ty| match self.unit.types[ty].inner {
                        TypeInner::Scalar { kind, .. } => Some(kind),
                        _ => None,
                    })
                    .filter(|&kind| kind != ScalarKind::Bool)
                    .unwrap_or(ScalarKind::Sint);
                let ty = self.type_scalar(kind);
                self.unit.exprs.get_mut(expr).const_int = match kind {
                    ScalarKind::Float => None,
                    _ => Some(value),
                };
                ty
            }
        };
        self.unit.exprs.get_mut(expr).ty = Some(ty);
        Some(ty)
    }

    fn ident(
        &mut self,
        expr: Handle<Expr>,
        name: &str,
        location: Location,
    ) -> Option<Handle<Type>> {
        let decl = match self.lookup(name) {
            Some(decl) => decl,
            None => {
                self.diagnostics
                    .add(location, format!("unknown identifier `{}`", name));
                return None;
            }
        };

        let ty = self.unit.decls[decl].ty;
        let (ty, as_type, assignable, const_int) = match self.unit.decls[decl].kind {
            DeclKind::Var(ref var) => {
                let ty = ty?;
                let assignable = match var.kind {
                    VarKind::Plain | VarKind::InParam | VarKind::OutParam | VarKind::InOutParam => {
                        true
                    }
                    VarKind::GroupShared => true,
                    VarKind::Uniform => matches!(
                        self.unit.types[ty].inner,
                        TypeInner::RwStructuredBuffer { .. }
                    ),
                };
                (ty, None, assignable, None)
            }
            DeclKind::Const(ref constant) => {
                let const_int = self.unit.exprs[constant.init].const_int;
                (ty?, None, false, const_int)
            }
            DeclKind::Field(_) => {
                // A cbuffer member injected into the global scope.
                (ty?, None, false, None)
            }
            DeclKind::Function(_) => (ty?, None, false, None),
            DeclKind::Struct(_) => {
                let meta = self.type_meta();
                (meta, ty, false, None)
            }
        };

        let node = self.unit.exprs.get_mut(expr);
        node.ty = Some(ty);
        node.as_type = as_type;
        node.assignable = assignable;
        node.const_int = const_int;
        if let ExprKind::Ident {
            decl: ref mut slot, ..
        } = node.kind
        {
            *slot = Some(decl);
        }
        Some(ty)
    }

    fn access(
        &mut self,
        expr: Handle<Expr>,
        base: Handle<Expr>,
        chain: &[Handle<Expr>],
    ) -> Option<Handle<Type>> {
        let mut current = self.expr(base, None)?;
        let mut assignable = self.unit.exprs[base].assignable;

        for &ident in chain {
            let (name, location) = match self.unit.exprs[ident].kind {
                ExprKind::Ident { ref name, .. } => {
                    (name.clone(), self.unit.exprs[ident].location)
                }
                _ => return None,
            };

            if let Some(st) = self.as_struct(current) {
                match self.struct_member(st, &name) {
                    Some((field_decl, _, field_ty)) => {
                        let node = self.unit.exprs.get_mut(ident);
                        node.ty = Some(field_ty);
                        if let ExprKind::Ident {
                            decl: ref mut slot, ..
                        } = node.kind
                        {
                            *slot = Some(field_decl);
                        }
                        current = field_ty;
                        continue;
                    }
                    None => {
                        self.diagnostics.add(
                            location,
                            format!("no field `{}` on `{}`", name, self.type_name(st)),
                        );
                        return None;
                    }
                }
            }

            if let TypeInner::Vector { elem, size } = self.unit.types[current].inner {
                let indices = match swizzle_indices(&name, size) {
                    Some(indices) => indices,
                    None => {
                        self.diagnostics
                            .add(location, format!("invalid swizzle `{}`", name));
                        return None;
                    }
                };
                let distinct = indices
                    .iter()
                    .all(|a| indices.iter().filter(|&b| a == b).count() == 1);
                let ty = if indices.len() == 1 {
                    elem
                } else {
                    let kind = self.scalar_kind(elem)?;
                    self.type_vector(kind, indices.len() as u32)
                };
                assignable = assignable && distinct;
                let node = self.unit.exprs.get_mut(ident);
                node.ty = Some(ty);
                if let ExprKind::Ident {
                    swizzle: ref mut slot,
                    ..
                } = node.kind
                {
                    *slot = Some(indices);
                }
                current = ty;
                continue;
            }

            self.diagnostics.add(
                location,
                format!("type `{}` has no members", self.type_name(current)),
            );
            return None;
        }

        let node = self.unit.exprs.get_mut(expr);
        node.ty = Some(current);
        node.assignable = assignable;
        Some(current)
    }

    fn struct_member(
        &self,
        st: Handle<Type>,
        name: &str,
    ) -> Option<(Handle<Decl>, u32, Handle<Type>)> {
        match self.unit.types[st].inner {
            TypeInner::Struct { decl, ref members } => {
                let index = members.iter().position(|member| member.name == name)?;
                let field_decl = match self.unit.decls[decl].kind {
                    DeclKind::Struct(ref body) => *body.fields.get(index)?,
                    _ => return None,
                };
                Some((field_decl, index as u32, members[index].ty))
            }
            _ => None,
        }
    }

    fn subscript(
        &mut self,
        expr: Handle<Expr>,
        base: Handle<Expr>,
        index: Handle<Expr>,
        location: Location,
    ) -> Option<Handle<Type>> {
        let base_ty = self.expr(base, None)?;
        let uint = self.type_scalar(ScalarKind::Uint);
        if let Some(index_ty) = self.expr(index, Some(uint)) {
            if !self.is_integer_scalar(index_ty) {
                self.diagnostics.add(
                    self.unit.exprs[index].location,
                    "subscript index must be an integer".to_string(),
                );
            }
        }

        let (ty, assignable) = match self.unit.types[base_ty].inner {
            TypeInner::Vector { elem, .. } => (elem, self.unit.exprs[base].assignable),
            TypeInner::Matrix { column, .. } => (column, self.unit.exprs[base].assignable),
            TypeInner::StructuredBuffer { base } => (base, false),
            TypeInner::RwStructuredBuffer { base } => (base, true),
            _ => {
                self.diagnostics.add(
                    location,
                    format!("type `{}` cannot be indexed", self.type_name(base_ty)),
                );
                return None;
            }
        };

        let node = self.unit.exprs.get_mut(expr);
        node.ty = Some(ty);
        node.assignable = assignable;
        Some(ty)
    }

    fn call(
        &mut self,
        expr: Handle<Expr>,
        callee: Handle<Expr>,
        args: &[Handle<Expr>],
        object: Option<Handle<Expr>>,
        location: Location,
    ) -> Option<Handle<Type>> {
        if let Some(object) = object {
            return self.method_call(expr, callee, args, object, location);
        }

        let callee_ty = self.expr(callee, None)?;

        // A type in call position is a constructor.
        if let Some(constructed) = self.unit.exprs[callee].as_type {
            return self.constructor(expr, constructed, args, location);
        }

        let (ret, param_types) = match self.unit.types[callee_ty].inner {
            TypeInner::Function { ret, ref params } => (ret, params.clone()),
            _ => {
                self.diagnostics
                    .add(location, "called object is not a function".to_string());
                return None;
            }
        };

        let function_decl = match self.unit.exprs[callee].kind {
            ExprKind::Ident { decl: Some(decl), .. } => Some(decl),
            _ => None,
        };

        if args.len() != param_types.len() {
            self.diagnostics.add(
                location,
                format!(
                    "expected {} arguments, found {}",
                    param_types.len(),
                    args.len()
                ),
            );
            return None;
        }

        for (&arg, &param_ty) in args.iter().zip(&param_types) {
            let (value_ty, by_reference) = match self.unit.types[param_ty].inner {
                TypeInner::Pointer { base, .. } => (base, true),
                _ => (param_ty, false),
            };
            if let Some(arg_ty) = self.expr(arg, Some(value_ty)) {
                self.check_assignable_types(self.unit.exprs[arg].location, value_ty, arg_ty);
            }
            if by_reference && !self.unit.exprs[arg].assignable {
                self.diagnostics.add(
                    self.unit.exprs[arg].location,
                    "argument for an `out` parameter must be an lvalue".to_string(),
                );
            }
        }

        if let Some(decl) = function_decl {
            if let DeclKind::Function(ref mut function) = self.unit.decls.get_mut(decl).kind {
                function.called = true;
            }
        }

        self.unit.exprs.get_mut(expr).ty = Some(ret);
        Some(ret)
    }

    fn method_call(
        &mut self,
        expr: Handle<Expr>,
        callee: Handle<Expr>,
        args: &[Handle<Expr>],
        object: Handle<Expr>,
        location: Location,
    ) -> Option<Handle<Type>> {
        let object_ty = self.expr(object, None)?;
        let method = match self.unit.exprs[callee].kind {
            ExprKind::Ident { ref name, .. } => name.clone(),
            _ => return None,
        };

        let (sampled, dim) = match self.unit.types[object_ty].inner {
            TypeInner::Image { sampled, dim } => (sampled, dim),
            _ => {
                self.diagnostics.add(
                    location,
                    format!("type `{}` has no methods", self.type_name(object_ty)),
                );
                return None;
            }
        };

        if method != "Sample" {
            self.diagnostics
                .add(location, format!("unknown texture method `{}`", method));
            return None;
        }
        if args.len() != 2 {
            self.diagnostics.add(
                location,
                format!("`Sample` expects 2 arguments, found {}", args.len()),
            );
            return None;
        }

        if let Some(sampler_ty) = self.expr(args[0], None) {
            if !matches!(self.unit.types[sampler_ty].inner, TypeInner::Sampler) {
                self.diagnostics.add(
                    self.unit.exprs[args[0]].location,
                    "the first argument of `Sample` must be a SamplerState".to_string(),
                );
            }
        }

        let coord_size = match dim {
            spirv::Dim::Dim1D => 1,
            spirv::Dim::Dim2D => 2,
            _ => 3,
        };
        let coord_ty = if coord_size == 1 {
            self.type_scalar(ScalarKind::Float)
        } else {
            self.type_vector(ScalarKind::Float, coord_size)
        };
        if let Some(arg_ty) = self.expr(args[1], Some(coord_ty)) {
            if arg_ty != coord_ty {
                self.diagnostics.add(
                    self.unit.exprs[args[1]].location,
                    format!(
                        "`Sample` coordinates must be `{}`",
                        self.type_name(coord_ty)
                    ),
                );
            }
        }

        let kind = self.scalar_kind(sampled).unwrap_or(ScalarKind::Float);
        let ty = self.type_vector(kind, 4);
        self.unit.exprs.get_mut(expr).ty = Some(ty);
        Some(ty)
    }

    fn constructor(
        &mut self,
        expr: Handle<Expr>,
        constructed: Handle<Type>,
        args: &[Handle<Expr>],
        location: Location,
    ) -> Option<Handle<Type>> {
        match self.unit.types[constructed].inner {
            TypeInner::Scalar { kind, .. } => {
                if kind == ScalarKind::Bool {
                    self.diagnostics
                        .add(location, "cannot construct a bool".to_string());
                    return None;
                }
                if args.len() != 1 {
                    self.diagnostics.add(
                        location,
                        "a scalar constructor takes exactly one argument".to_string(),
                    );
                    return None;
                }
                if let Some(arg_ty) = self.expr(args[0], None) {
                    if !self.is_numeric_scalar(arg_ty) {
                        self.diagnostics.add(
                            self.unit.exprs[args[0]].location,
                            "scalar constructors convert numeric scalars only".to_string(),
                        );
                    }
                }
            }
            TypeInner::Vector { elem, size } => {
                let mut provided = 0;
                for &arg in args {
                    if let Some(arg_ty) = self.expr(arg, Some(elem)) {
                        match self.component_count(arg_ty) {
                            Some(count) => provided += count,
                            None => {
                                self.diagnostics.add(
                                    self.unit.exprs[arg].location,
                                    "vector constructor arguments must be scalars or vectors"
                                        .to_string(),
                                );
                            }
                        }
                        let elem_kind = self.scalar_kind(elem);
                        if self.scalar_kind(arg_ty) != elem_kind {
                            self.diagnostics.add(
                                self.unit.exprs[arg].location,
                                "vector constructor argument has the wrong component type"
                                    .to_string(),
                            );
                        }
                    }
                }
                if provided != size {
                    self.diagnostics.add(
                        location,
                        format!(
                            "vector constructor needs {} components, found {}",
                            size, provided
                        ),
                    );
                }
            }
            TypeInner::Matrix { columns, column } => {
                let rows = self.vector_size(column).unwrap_or(0);
                let elem = match self.unit.types[column].inner {
                    TypeInner::Vector { elem, .. } => elem,
                    _ => return None,
                };
                if args.len() as u32 != columns * rows {
                    self.diagnostics.add(
                        location,
                        format!(
                            "matrix constructor needs {} scalars, found {}",
                            columns * rows,
                            args.len()
                        ),
                    );
                }
                for &arg in args {
                    if let Some(arg_ty) = self.expr(arg, Some(elem)) {
                        if !self.is_scalar(arg_ty) {
                            self.diagnostics.add(
                                self.unit.exprs[arg].location,
                                "matrix constructor arguments must be scalars".to_string(),
                            );
                        }
                    }
                }
            }
            _ => {
                self.diagnostics.add(
                    location,
                    format!("cannot construct `{}`", self.type_name(constructed)),
                );
                return None;
            }
        }

        self.unit.exprs.get_mut(expr).ty = Some(constructed);
        Some(constructed)
    }

    fn intrinsic_call(
        &mut self,
        expr: Handle<Expr>,
        op: Intrinsic,
        args: &[Handle<Expr>],
        location: Location,
    ) -> Option<Handle<Type>> {
        if !op.arity().contains(&args.len()) {
            self.diagnostics.add(
                location,
                format!(
                    "`{:?}` expects {} arguments, found {}",
                    op,
                    op.arity().start(),
                    args.len()
                ),
            );
            return None;
        }

        if op.is_derivative() && self.stage != ShaderStage::Fragment {
            self.diagnostics.add(
                location,
                "derivative intrinsics are only allowed in fragment shaders".to_string(),
            );
        }

        if op.is_atomic() {
            return self.atomic_call(expr, op, args, location);
        }

        use Intrinsic::*;
        let ty = match op {
            // T -> T over floats
            Sin | Cos | Tan | Asin | Acos | Atan | Sinh | Cosh | Tanh | Sqrt | Rsqrt | Exp
            | Exp2 | Log | Log2 | Floor | Ceil | Trunc | Frac | Degrees | Radians | Normalize
            | Ddx | Ddy => {
                let ty = self.float_operand(args[0], None)?;
                ty
            }
            Abs => {
                let ty = self.expr(args[0], None)?;
                if self.scalar_kind(ty).map_or(true, |k| k == ScalarKind::Bool) {
                    self.operand_error(args[0], "a numeric scalar or vector");
                    return None;
                }
                ty
            }
            Atan2 | Pow | Step | Reflect => {
                let ty = self.float_operand(args[0], None)?;
                self.float_operand(args[1], Some(ty))?;
                ty
            }
            Min | Max => {
                let ty = self.expr(args[0], None)?;
                if self.scalar_kind(ty).map_or(true, |k| k == ScalarKind::Bool) {
                    self.operand_error(args[0], "a numeric scalar or vector");
                    return None;
                }
                self.same_operand(args[1], ty)?;
                ty
            }
            Lerp | SmoothStep => {
                let ty = self.float_operand(args[0], None)?;
                self.float_operand(args[1], Some(ty))?;
                self.float_operand(args[2], Some(ty))?;
                ty
            }
            Clamp => {
                let ty = self.expr(args[0], None)?;
                if self.scalar_kind(ty).map_or(true, |k| k == ScalarKind::Bool) {
                    self.operand_error(args[0], "a numeric scalar or vector");
                    return None;
                }
                self.same_operand(args[1], ty)?;
                self.same_operand(args[2], ty)?;
                ty
            }
            Refract => {
                let ty = self.float_operand(args[0], None)?;
                self.float_operand(args[1], Some(ty))?;
                let float = self.type_scalar(ScalarKind::Float);
                self.same_operand(args[2], float)?;
                ty
            }
            Dot => {
                let ty = self.vector_operand(args[0])?;
                self.same_operand(args[1], ty)?;
                self.type_scalar(ScalarKind::Float)
            }
            Cross => {
                let vec3 = self.type_vector(ScalarKind::Float, 3);
                self.same_operand(args[0], vec3)?;
                self.same_operand(args[1], vec3)?;
                vec3
            }
            Length => {
                self.vector_operand(args[0])?;
                self.type_scalar(ScalarKind::Float)
            }
            Distance => {
                let ty = self.vector_operand(args[0])?;
                self.same_operand(args[1], ty)?;
                self.type_scalar(ScalarKind::Float)
            }
            Mul => self.mul_call(args, location)?,
            Transpose => {
                let ty = self.expr(args[0], None)?;
                match self.unit.types[ty].inner {
                    TypeInner::Matrix { columns, column } => {
                        let rows = self.vector_size(column).unwrap_or(0);
                        let kind = self.scalar_kind(column)?;
                        let new_column = self.type_vector(kind, columns);
                        self.intern(
                            None,
                            TypeInner::Matrix {
                                columns: rows,
                                column: new_column,
                            },
                        )
                    }
                    _ => {
                        self.operand_error(args[0], "a matrix");
                        return None;
                    }
                }
            }
            Determinant => {
                let ty = self.expr(args[0], None)?;
                if !matches!(self.unit.types[ty].inner, TypeInner::Matrix { .. }) {
                    self.operand_error(args[0], "a matrix");
                    return None;
                }
                self.type_scalar(ScalarKind::Float)
            }
            AsFloat | AsInt | AsUint => {
                let ty = self.expr(args[0], None)?;
                if self.scalar_kind(ty).map_or(true, |k| k == ScalarKind::Bool)
                    || matches!(self.unit.types[ty].inner, TypeInner::Matrix { .. })
                {
                    self.operand_error(args[0], "a 32-bit scalar or vector");
                    return None;
                }
                let kind = match op {
                    AsFloat => ScalarKind::Float,
                    AsInt => ScalarKind::Sint,
                    _ => ScalarKind::Uint,
                };
                self.with_scalar_kind(ty, kind)
            }
            _ => return None,
        };

        self.unit.exprs.get_mut(expr).ty = Some(ty);
        Some(ty)
    }

    fn mul_call(&mut self, args: &[Handle<Expr>], location: Location) -> Option<Handle<Type>> {
        let left = self.expr(args[0], None)?;
        let right = self.expr(args[1], Some(left))?;

        let left_inner = &self.unit.types[left].inner;
        let right_inner = &self.unit.types[right].inner;
        match (left_inner, right_inner) {
            (&TypeInner::Scalar { .. }, &TypeInner::Scalar { .. }) => {
                if left != right {
                    self.diagnostics
                        .add(location, "`mul` operands must match".to_string());
                }
                Some(left)
            }
            (&TypeInner::Vector { size: a, .. }, &TypeInner::Vector { size: b, .. }) => {
                if a != b {
                    self.diagnostics
                        .add(location, "`mul` vector sizes must match".to_string());
                }
                Some(self.type_scalar(ScalarKind::Float))
            }
            (&TypeInner::Vector { size, .. }, &TypeInner::Matrix { columns, column }) => {
                let rows = self.vector_size(column).unwrap_or(0);
                if size != rows {
                    self.diagnostics.add(
                        location,
                        "`mul` vector length must match the matrix rows".to_string(),
                    );
                }
                Some(self.type_vector(ScalarKind::Float, columns))
            }
            (&TypeInner::Matrix { columns, column }, &TypeInner::Vector { size, .. }) => {
                let rows = self.vector_size(column).unwrap_or(0);
                if size != columns {
                    self.diagnostics.add(
                        location,
                        "`mul` vector length must match the matrix columns".to_string(),
                    );
                }
                Some(self.type_vector(ScalarKind::Float, rows))
            }
            (
                &TypeInner::Matrix {
                    columns: a_cols,
                    column: a_col,
                },
                &TypeInner::Matrix {
                    columns: b_cols,
                    column: b_col,
                },
            ) => {
                let a_rows = self.vector_size(a_col).unwrap_or(0);
                let b_rows = self.vector_size(b_col).unwrap_or(0);
                if a_cols != b_rows {
                    self.diagnostics.add(
                        location,
                        "`mul` inner matrix dimensions must match".to_string(),
                    );
                }
                let column = self.type_vector(ScalarKind::Float, a_rows);
                Some(self.intern(
                    None,
                    TypeInner::Matrix {
                        columns: b_cols,
                        column,
                    },
                ))
            }
            _ => {
                self.diagnostics.add(
                    location,
                    "`mul` expects scalar, vector or matrix operands".to_string(),
                );
                None
            }
        }
    }

    fn atomic_call(
        &mut self,
        expr: Handle<Expr>,
        op: Intrinsic,
        args: &[Handle<Expr>],
        _location: Location,
    ) -> Option<Handle<Type>> {
        let dest_ty = self.expr(args[0], None)?;
        if !self.is_integer_scalar(dest_ty) {
            self.operand_error(args[0], "an `int` or `uint` lvalue");
        } else if !self.unit.exprs[args[0]].assignable {
            self.diagnostics.add(
                self.unit.exprs[args[0]].location,
                "atomic destination must be a writable lvalue".to_string(),
            );
        }

        for &value_arg in &args[1..] {
            if let Some(ty) = self.expr(value_arg, Some(dest_ty)) {
                if !self.is_integer_scalar(ty) {
                    self.operand_error(value_arg, "an integer scalar");
                }
            }
        }

        // The trailing argument of the exchange forms receives the
        // original value.
        let out_arg = match op {
            Intrinsic::InterlockedExchange => Some(args[2]),
            Intrinsic::InterlockedCompareExchange => Some(args[3]),
            _ => None,
        };
        if let Some(out_arg) = out_arg {
            if !self.unit.exprs[out_arg].assignable {
                self.diagnostics.add(
                    self.unit.exprs[out_arg].location,
                    "the output argument must be an lvalue".to_string(),
                );
            }
        }

        let void = self.type_void();
        self.unit.exprs.get_mut(expr).ty = Some(void);
        Some(void)
    }

    fn float_operand(
        &mut self,
        arg: Handle<Expr>,
        expected: Option<Handle<Type>>,
    ) -> Option<Handle<Type>> {
        let float = self.type_scalar(ScalarKind::Float);
        let ty = self.expr(arg, expected.or(Some(float)))?;
        if self.scalar_kind(ty) != Some(ScalarKind::Float)
            || matches!(self.unit.types[ty].inner, TypeInner::Matrix { .. })
        {
            self.operand_error(arg, "a float scalar or vector");
            return None;
        }
        if let Some(expected) = expected {
            if ty != expected {
                self.operand_error(arg, "an operand of matching type");
                return None;
            }
        }
        Some(ty)
    }

    fn same_operand(&mut self, arg: Handle<Expr>, expected: Handle<Type>) -> Option<Handle<Type>> {
        let ty = self.expr(arg, Some(expected))?;
        if ty != expected {
            self.operand_error(arg, "an operand of matching type");
            return None;
        }
        Some(ty)
    }

    fn vector_operand(&mut self, arg: Handle<Expr>) -> Option<Handle<Type>> {
        let ty = self.expr(arg, None)?;
        match self.unit.types[ty].inner {
            TypeInner::Vector { .. } => Some(ty),
            _ => {
                self.operand_error(arg, "a vector");
                None
            }
        }
    }

    fn operand_error(&mut self, arg: Handle<Expr>, expected: &str) {
        self.diagnostics.add(
            self.unit.exprs[arg].location,
            format!("expected {}", expected),
        );
    }

    fn unary(
        &mut self,
        expr: Handle<Expr>,
        op: UnaryOp,
        operand: Handle<Expr>,
        location: Location,
    ) -> Option<Handle<Type>> {
        let operand_ty = self.expr(operand, None)?;
        let ty = match op {
            UnaryOp::Negate => {
                if self.scalar_kind(operand_ty).map_or(true, |k| k == ScalarKind::Bool) {
                    self.diagnostics
                        .add(location, "cannot negate this type".to_string());
                    return None;
                }
                operand_ty
            }
            UnaryOp::Not => {
                if !self.is_scalar(operand_ty) {
                    self.diagnostics
                        .add(location, "`!` expects a scalar operand".to_string());
                    return None;
                }
                self.type_scalar(ScalarKind::Bool)
            }
            UnaryOp::BitNot => {
                match self.scalar_kind(operand_ty) {
                    Some(ScalarKind::Sint) | Some(ScalarKind::Uint) => {}
                    _ => {
                        self.diagnostics
                            .add(location, "`~` expects an integer operand".to_string());
                        return None;
                    }
                }
                operand_ty
            }
            UnaryOp::PreIncrement
            | UnaryOp::PreDecrement
            | UnaryOp::PostIncrement
            | UnaryOp::PostDecrement => {
                if !self.is_numeric_scalar(operand_ty) {
                    self.diagnostics.add(
                        location,
                        "increment and decrement expect a numeric scalar".to_string(),
                    );
                    return None;
                }
                if !self.unit.exprs[operand].assignable {
                    self.diagnostics.add(
                        location,
                        "increment and decrement need an assignable operand".to_string(),
                    );
                }
                operand_ty
            }
        };

        // Fold `-literal` so that constant contexts accept it.
        if op == UnaryOp::Negate {
            if let Some(value) = self.unit.exprs[operand].const_int {
                self.unit.exprs.get_mut(expr).const_int = Some(-value);
            }
        }

        self.unit.exprs.get_mut(expr).ty = Some(ty);
        Some(ty)
    }

    fn binary(
        &mut self,
        expr: Handle<Expr>,
        op: BinaryOp,
        left: Handle<Expr>,
        right: Handle<Expr>,
        location: Location,
    ) -> Option<Handle<Type>> {
        let left_ty = self.expr(left, None)?;
        let right_ty = self.expr(right, Some(left_ty))?;

        // If the left side was an int literal and the right side turned
        // out to be float, re-type the literal after the fact.
        let (left_ty, right_ty) = self.unify_literals(left, left_ty, right, right_ty);

        use BinaryOp::*;
        let ty = match op {
            Add | Subtract | Multiply | Divide | Modulo => {
                self.arithmetic_type(location, left_ty, right_ty)?
            }
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => {
                let operand = self.arithmetic_type(location, left_ty, right_ty)?;
                match self.unit.types[operand].inner {
                    TypeInner::Vector { size, .. } => self.type_vector(ScalarKind::Bool, size),
                    _ => self.type_scalar(ScalarKind::Bool),
                }
            }
            LogicalAnd | LogicalOr => {
                let bool_ty = self.type_scalar(ScalarKind::Bool);
                for &(operand, ty) in &[(left, left_ty), (right, right_ty)] {
                    if ty != bool_ty {
                        self.operand_error(operand, "a boolean operand");
                    }
                }
                bool_ty
            }
            And | ExclusiveOr | InclusiveOr | ShiftLeft | ShiftRight => {
                match self.scalar_kind(left_ty) {
                    Some(ScalarKind::Sint) | Some(ScalarKind::Uint) => {}
                    _ => {
                        self.operand_error(left, "an integer operand");
                        return None;
                    }
                }
                match self.scalar_kind(right_ty) {
                    Some(ScalarKind::Sint) | Some(ScalarKind::Uint) => {}
                    _ => {
                        self.operand_error(right, "an integer operand");
                        return None;
                    }
                }
                left_ty
            }
        };

        // Constant-integer resolution over `+`, `-` and `*`.
        if matches!(op, Add | Subtract | Multiply) {
            let folded = match (
                self.unit.exprs[left].const_int,
                self.unit.exprs[right].const_int,
            ) {
                (Some(a), Some(b)) => match op {
                    Add => a.checked_add(b),
                    Subtract => a.checked_sub(b),
                    Multiply => a.checked_mul(b),
                    _ => None,
                },
                _ => None,
            };
            self.unit.exprs.get_mut(expr).const_int = folded;
        }

        self.unit.exprs.get_mut(expr).ty = Some(ty);
        Some(ty)
    }

    fn unify_literals(
        &mut self,
        left: Handle<Expr>,
        left_ty: Handle<Type>,
        _right: Handle<Expr>,
        right_ty: Handle<Type>,
    ) -> (Handle<Type>, Handle<Type>) {
        let left_kind = self.scalar_kind(left_ty);
        let right_kind = self.scalar_kind(right_ty);
        if left_kind != Some(ScalarKind::Float)
            && right_kind == Some(ScalarKind::Float)
            && self.unit.exprs[left].const_int.is_some()
            && self.is_scalar(left_ty)
        {
            let float = self.type_scalar(ScalarKind::Float);
            let node = self.unit.exprs.get_mut(left);
            node.ty = Some(float);
            node.const_int = None;
            return (float, right_ty);
        }
        (left_ty, right_ty)
    }

    /// Result type of an element-wise arithmetic operation, handling
    /// scalar broadcast and int-to-float widening.
    fn arithmetic_type(
        &mut self,
        location: Location,
        left_ty: Handle<Type>,
        right_ty: Handle<Type>,
    ) -> Option<Handle<Type>> {
        let left_kind = self.scalar_kind(left_ty);
        let right_kind = self.scalar_kind(right_ty);
        if left_kind.map_or(true, |k| k == ScalarKind::Bool)
            || right_kind.map_or(true, |k| k == ScalarKind::Bool)
            || matches!(self.unit.types[left_ty].inner, TypeInner::Matrix { .. })
            || matches!(self.unit.types[right_ty].inner, TypeInner::Matrix { .. })
        {
            self.diagnostics.add(
                location,
                "operands must be numeric scalars or vectors".to_string(),
            );
            return None;
        }

        let kind = if left_kind == right_kind {
            left_kind?
        } else if left_kind == Some(ScalarKind::Float) || right_kind == Some(ScalarKind::Float) {
            ScalarKind::Float
        } else {
            // int and uint mix; keep the left-hand side's signedness.
            left_kind?
        };

        let left_size = self.vector_size(left_ty);
        let right_size = self.vector_size(right_ty);
        match (left_size, right_size) {
            (Some(a), Some(b)) => {
                if a != b {
                    self.diagnostics
                        .add(location, "vector sizes do not match".to_string());
                    return None;
                }
                Some(self.type_vector(kind, a))
            }
            (Some(size), None) | (None, Some(size)) => Some(self.type_vector(kind, size)),
            (None, None) => Some(self.type_scalar(kind)),
        }
    }

    //
    // Entry point stage I/O
    //

    fn build_entry_point(&mut self, decl: Handle<Decl>, ret: Handle<Type>) {
        let (location, params, attributes) = match self.unit.decls[decl] {
            Decl {
                location,
                kind: DeclKind::Function(ref function),
                ..
            } => {
                let attribute_args: Vec<(String, Vec<Handle<Expr>>, Location)> = function
                    .attributes
                    .iter()
                    .map(|a| (a.name.clone(), a.args.clone(), a.location))
                    .collect();
                (location, function.params.clone(), attribute_args)
            }
            _ => return,
        };

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut input_location = 0;
        let mut output_location = 0;

        for (index, &param) in params.iter().enumerate() {
            let (param_name, param_location, var_kind, semantic) = match self.unit.decls[param] {
                Decl {
                    ref name,
                    location,
                    kind: DeclKind::Var(ref var),
                    ..
                } => (name.clone(), location, var.kind, var.semantic.clone()),
                _ => continue,
            };
            let ty = match self.unit.decls[param].ty {
                Some(ty) => ty,
                None => continue,
            };

            if var_kind == VarKind::InOutParam {
                self.diagnostics.add(
                    param_location,
                    "`inout` parameters are not supported on entry points".to_string(),
                );
                continue;
            }
            let output = var_kind == VarKind::OutParam;
            let (slot, counter) = if output {
                (&mut outputs, &mut output_location)
            } else {
                (&mut inputs, &mut input_location)
            };

            match self.unit.types[ty].inner {
                TypeInner::Struct { ref members, .. } => {
                    let members: Vec<(String, Handle<Type>, Option<String>)> = members
                        .iter()
                        .map(|m| (m.name.clone(), m.ty, m.semantic.clone()))
                        .collect();
                    for (member_index, (name, member_ty, semantic)) in
                        members.into_iter().enumerate()
                    {
                        let decorations = io_decorations(
                            self.diagnostics,
                            self.stage,
                            semantic.as_deref(),
                            output,
                            counter,
                            param_location,
                        );
                        slot.push(StageIo {
                            name,
                            ty: member_ty,
                            decorations,
                            origin: if output {
                                IoOrigin::OutParamMember(index, member_index as u32)
                            } else {
                                IoOrigin::ParamMember(index, member_index as u32)
                            },
                        });
                    }
                }
                _ => {
                    let decorations = io_decorations(
                        self.diagnostics,
                        self.stage,
                        semantic.as_deref(),
                        output,
                        counter,
                        param_location,
                    );
                    slot.push(StageIo {
                        name: param_name,
                        ty,
                        decorations,
                        origin: if output {
                            IoOrigin::OutParam(index)
                        } else {
                            IoOrigin::Param(index)
                        },
                    });
                }
            }
        }

        let void = self.type_void();
        if ret != void {
            let return_semantic = match self.unit.decls[decl].kind {
                DeclKind::Function(ref function) => function.return_semantic.clone(),
                _ => None,
            };
            match self.unit.types[ret].inner {
                TypeInner::Struct { ref members, .. } => {
                    let members: Vec<(String, Handle<Type>, Option<String>)> = members
                        .iter()
                        .map(|m| (m.name.clone(), m.ty, m.semantic.clone()))
                        .collect();
                    for (member_index, (name, member_ty, semantic)) in
                        members.into_iter().enumerate()
                    {
                        let decorations = io_decorations(
                            self.diagnostics,
                            self.stage,
                            semantic.as_deref(),
                            true,
                            &mut output_location,
                            location,
                        );
                        outputs.push(StageIo {
                            name,
                            ty: member_ty,
                            decorations,
                            origin: IoOrigin::ReturnMember(member_index as u32),
                        });
                    }
                }
                _ => {
                    let decorations = io_decorations(
                        self.diagnostics,
                        self.stage,
                        return_semantic.as_deref(),
                        true,
                        &mut output_location,
                        location,
                    );
                    outputs.push(StageIo {
                        name: self.unit.decls[decl].name.clone(),
                        ty: ret,
                        decorations,
                        origin: IoOrigin::ReturnValue,
                    });
                }
            }
        }

        let workgroup_size = self.workgroup_size(location, &attributes);

        self.unit.entry_point = Some(EntryPoint {
            function: decl,
            stage: self.stage,
            workgroup_size,
            inputs,
            outputs,
        });
    }

    fn workgroup_size(
        &mut self,
        location: Location,
        attributes: &[(String, Vec<Handle<Expr>>, Location)],
    ) -> [u32; 3] {
        let numthreads = attributes
            .iter()
            .find(|(name, _, _)| name == "numthreads");

        if self.stage != ShaderStage::Compute {
            return [0; 3];
        }

        let (args, attr_location) = match numthreads {
            Some((_, args, location)) => (args.clone(), *location),
            None => {
                self.diagnostics.add(
                    location,
                    "compute entry points require a `[numthreads(x, y, z)]` attribute"
                        .to_string(),
                );
                return [1, 1, 1];
            }
        };

        let mut size = [1u32; 3];
        let uint = self.type_scalar(ScalarKind::Uint);
        if args.len() != 3 {
            self.diagnostics.add(
                attr_location,
                "`numthreads` takes exactly three arguments".to_string(),
            );
            return size;
        }
        for (slot, &arg) in size.iter_mut().zip(&args) {
            let _ = self.expr(arg, Some(uint));
            match self.unit.exprs[arg].const_int {
                Some(value) if value > 0 => *slot = value as u32,
                _ => {
                    self.diagnostics.add(
                        self.unit.exprs[arg].location,
                        "`numthreads` arguments must be positive integer constants".to_string(),
                    );
                }
            }
        }
        size
    }
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Sint => "int",
        ScalarKind::Uint => "uint",
        ScalarKind::Float => "float",
        ScalarKind::Bool => "bool",
    }
}

/// Component indices for a swizzle like `xyz` or `rgba`, if every letter
/// is a component of a vector of the given size.
fn swizzle_indices(name: &str, size: u32) -> Option<Vec<u32>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    let mut indices = Vec::with_capacity(name.len());
    for letter in name.chars() {
        let index = match letter {
            'x' | 'r' => 0,
            'y' | 'g' => 1,
            'z' | 'b' => 2,
            'w' | 'a' => 3,
            _ => return None,
        };
        if index >= size {
            return None;
        }
        indices.push(index);
    }
    Some(indices)
}

/// Decorations for one stage input or output: a builtin derived from the
/// HLSL system-value semantic, or a sequentially assigned location.
fn io_decorations(
    diagnostics: &mut Diagnostics,
    stage: ShaderStage,
    semantic: Option<&str>,
    output: bool,
    location_counter: &mut u32,
    location: Location,
) -> Vec<Decoration> {
    let semantic = match semantic {
        Some(semantic) => semantic,
        None => {
            diagnostics.add(
                location,
                "entry point inputs and outputs require a semantic".to_string(),
            );
            return Vec::new();
        }
    };

    let lower = semantic.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("sv_target") {
        let index = rest.parse::<u32>().unwrap_or(0);
        return vec![Decoration::with(spirv::Decoration::Location, index)];
    }

    let built_in = match lower.as_str() {
        "sv_position" => {
            if !output && stage == ShaderStage::Fragment {
                Some(spirv::BuiltIn::FragCoord)
            } else {
                Some(spirv::BuiltIn::Position)
            }
        }
        "sv_depth" => Some(spirv::BuiltIn::FragDepth),
        "sv_vertexid" => Some(spirv::BuiltIn::VertexIndex),
        "sv_instanceid" => Some(spirv::BuiltIn::InstanceIndex),
        "sv_dispatchthreadid" => Some(spirv::BuiltIn::GlobalInvocationId),
        "sv_groupid" => Some(spirv::BuiltIn::WorkgroupId),
        "sv_groupthreadid" => Some(spirv::BuiltIn::LocalInvocationId),
        "sv_groupindex" => Some(spirv::BuiltIn::LocalInvocationIndex),
        _ if lower.starts_with("sv_") => {
            diagnostics.add(
                location,
                format!("unsupported system-value semantic `{}`", semantic),
            );
            None
        }
        _ => None,
    };

    match built_in {
        Some(built_in) => vec![Decoration::with(
            spirv::Decoration::BuiltIn,
            built_in as u32,
        )],
        None => {
            let index = *location_counter;
            *location_counter += 1;
            vec![Decoration::with(spirv::Decoration::Location, index)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::hlsl::{lex, parse};

    fn analyze_source(source: &str, entry: &str, stage: ShaderStage) -> (TranslationUnit, Vec<String>) {
        let mut diagnostics = Diagnostics::new("test");
        let tokens = lex::tokenize(source, &mut diagnostics);
        let mut unit = parse::parse(&tokens, &mut diagnostics);
        analyze(&mut unit, entry, stage, &mut diagnostics);
        let errors = diagnostics
            .into_vec()
            .into_iter()
            .map(|d| d.message)
            .collect();
        (unit, errors)
    }

    #[test]
    fn trivial_vertex_entry() {
        let (unit, errors) = analyze_source(
            "float4 main(float3 p : POSITION) : SV_Position { return float4(p, 1.0); }",
            "main",
            ShaderStage::Vertex,
        );
        assert!(errors.is_empty(), "{:?}", errors);
        let entry = unit.entry_point.expect("entry point");
        assert_eq!(entry.inputs.len(), 1);
        assert_eq!(entry.outputs.len(), 1);
        assert_eq!(
            entry.inputs[0].decorations,
            vec![Decoration::with(spirv::Decoration::Location, 0)]
        );
        assert_eq!(
            entry.outputs[0].decorations,
            vec![Decoration::with(
                spirv::Decoration::BuiltIn,
                spirv::BuiltIn::Position as u32
            )]
        );
    }

    #[test]
    fn resource_bindings_auto_increment() {
        let (unit, errors) = analyze_source(
            "Texture2D tex;\nSamplerState samp;\n\
             float4 main(float2 uv : TEXCOORD0) : SV_Target { return tex.Sample(samp, uv); }",
            "main",
            ShaderStage::Fragment,
        );
        assert!(errors.is_empty(), "{:?}", errors);
        let bindings: Vec<Vec<Decoration>> = unit
            .globals
            .iter()
            .filter_map(|&decl| match unit.decls[decl].kind {
                DeclKind::Var(_) => Some(unit.decls[decl].decorations.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            bindings[0],
            vec![
                Decoration::with(spirv::Decoration::DescriptorSet, 0),
                Decoration::with(spirv::Decoration::Binding, 0),
            ]
        );
        assert_eq!(
            bindings[1],
            vec![
                Decoration::with(spirv::Decoration::DescriptorSet, 0),
                Decoration::with(spirv::Decoration::Binding, 1),
            ]
        );
    }

    #[test]
    fn repeated_swizzle_is_not_assignable() {
        let (_, errors) = analyze_source(
            "void main() { float4 v = float4(0.0, 0.0, 0.0, 0.0); v.xx = float2(1.0, 2.0); }",
            "main",
            ShaderStage::Vertex,
        );
        assert!(
            errors.iter().any(|e| e.contains("not assignable")),
            "{:?}",
            errors
        );
    }

    #[test]
    fn discard_outside_fragment() {
        let (_, errors) = analyze_source(
            "void main() { discard; }",
            "main",
            ShaderStage::Vertex,
        );
        assert!(errors.iter().any(|e| e.contains("discard")), "{:?}", errors);
    }

    #[test]
    fn break_outside_loop() {
        let (_, errors) = analyze_source("void main() { break; }", "main", ShaderStage::Vertex);
        assert!(errors.iter().any(|e| e.contains("break")), "{:?}", errors);
    }

    #[test]
    fn missing_entry_point() {
        let (_, errors) = analyze_source("void other() { }", "main", ShaderStage::Vertex);
        assert!(
            errors.iter().any(|e| e.contains("entry point")),
            "{:?}",
            errors
        );
    }

    #[test]
    fn numthreads_is_required_for_compute() {
        let (_, errors) = analyze_source(
            "void main(uint3 id : SV_DispatchThreadID) { }",
            "main",
            ShaderStage::Compute,
        );
        assert!(
            errors.iter().any(|e| e.contains("numthreads")),
            "{:?}",
            errors
        );
    }

    #[test]
    fn numthreads_from_const() {
        let (unit, errors) = analyze_source(
            "static const int GROUP = 8;\n\
             [numthreads(GROUP, GROUP, 1)]\n\
             void main(uint3 id : SV_DispatchThreadID) { }",
            "main",
            ShaderStage::Compute,
        );
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(unit.entry_point.unwrap().workgroup_size, [8, 8, 1]);
    }

    #[test]
    fn cbuffer_members_resolve_unqualified() {
        let (unit, errors) = analyze_source(
            "cbuffer Globals { float4 tint; };\n\
             float4 main() : SV_Target { return tint; }",
            "main",
            ShaderStage::Fragment,
        );
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(unit.cbuffer_members.len(), 1);
    }

    #[test]
    fn struct_member_offsets() {
        let (unit, errors) = analyze_source(
            "struct C { float4 a; float b; float4 c; };\n\
             void main() { }",
            "main",
            ShaderStage::Vertex,
        );
        assert!(errors.is_empty(), "{:?}", errors);
        let offsets: Vec<u32> = unit
            .types
            .iter()
            .find_map(|(_, ty)| match ty.inner {
                TypeInner::Struct { ref members, .. } => {
                    Some(members.iter().map(|m| m.offset).collect())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(offsets, vec![0, 16, 32]);
    }
}
