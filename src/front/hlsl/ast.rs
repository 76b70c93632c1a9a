//! Untyped AST produced by the parser, plus the structural type universe
//! attached to it by the analyzer.

use super::intrinsics::{BarrierScope, Intrinsic};
use crate::{
    arena::{Arena, Handle},
    Bytes, Decoration, FastHashMap, Location, ScalarKind, ShaderStage,
};

/// Everything the front end knows about one compilation.
///
/// The parser fills the arenas and `globals`; the analyzer attaches types,
/// resolved declarations and the synthesized [`EntryPoint`].
#[derive(Debug, Default)]
pub struct TranslationUnit {
    pub types: Arena<Type>,
    pub exprs: Arena<Expr>,
    pub stmts: Arena<Stmt>,
    pub decls: Arena<Decl>,
    /// Top-level declarations in source order.
    pub globals: Vec<Handle<Decl>>,
    /// The requested entry point, synthesized by the analyzer.
    pub entry_point: Option<EntryPoint>,
    /// For `cbuffer` sugar: field declaration → owning global variable and
    /// member index, so unqualified field references can be lowered.
    pub cbuffer_members: FastHashMap<Handle<Decl>, (Handle<Decl>, u32)>,
}

/// A data type, canonicalized per-unit: within one [`TranslationUnit`],
/// structurally equal types share a single handle.
#[derive(Debug, PartialEq)]
pub struct Type {
    /// The name of the type, if any.
    pub name: Option<String>,
    /// Inner structure that depends on the kind of the type.
    pub inner: TypeInner,
}

/// Enum with additional information, depending on the kind of type.
#[derive(Debug, PartialEq)]
pub enum TypeInner {
    Void,
    /// The meta-type of type-valued expressions (`float4` used as a
    /// constructor, a struct name in a declaration, ...).
    Meta,
    Scalar {
        kind: ScalarKind,
        width: Bytes,
    },
    Vector {
        elem: Handle<Type>,
        size: u32,
    },
    /// Column-major matrix; `column` is always a vector type.
    Matrix {
        columns: u32,
        column: Handle<Type>,
    },
    Pointer {
        class: spirv::StorageClass,
        base: Handle<Type>,
    },
    Function {
        ret: Handle<Type>,
        params: Vec<Handle<Type>>,
    },
    /// Structs are identified by their declaration site, not structurally.
    Struct {
        decl: Handle<Decl>,
        members: Vec<StructMember>,
    },
    Sampler,
    Image {
        sampled: Handle<Type>,
        dim: spirv::Dim,
    },
    SampledImage {
        image: Handle<Type>,
    },
    ConstantBuffer {
        base: Handle<Type>,
    },
    StructuredBuffer {
        base: Handle<Type>,
    },
    RwStructuredBuffer {
        base: Handle<Type>,
    },
}

/// Member of a user-defined structure.
#[derive(Debug, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Handle<Type>,
    pub semantic: Option<String>,
    /// Byte offset under the std140-flavoured layout rules.
    pub offset: u32,
}

/// An attribute attached to the following declaration: `[name(args...)]`.
#[derive(Debug)]
pub struct Attribute {
    pub name: String,
    pub location: Location,
    pub args: Vec<Handle<Expr>>,
}

/// An explicit `register(xN, spaceM)` binding.
#[derive(Clone, Copy, Debug)]
pub struct Register {
    pub class: char,
    pub index: u32,
    pub space: u32,
}

/// How a variable declaration is stored and passed around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VarKind {
    /// Function-local or stage-I/O backing variable.
    Plain,
    /// Module-level resource.
    Uniform,
    /// `groupshared` storage for compute.
    GroupShared,
    InParam,
    OutParam,
    InOutParam,
}

impl VarKind {
    /// Whether a parameter of this kind is passed as a pointer.
    pub fn is_by_reference(self) -> bool {
        matches!(self, VarKind::OutParam | VarKind::InOutParam)
    }
}

/// A declaration of any kind.
#[derive(Debug)]
pub struct Decl {
    pub name: String,
    pub location: Location,
    pub kind: DeclKind,
    /// Resolved type; for functions this is the function type, for
    /// variables the value type.
    pub ty: Option<Handle<Type>>,
    /// Decorations derived from attributes and semantics.
    pub decorations: Vec<Decoration>,
}

#[derive(Debug)]
pub enum DeclKind {
    Function(FunctionDecl),
    Var(VarDecl),
    Const(ConstDecl),
    Struct(StructDecl),
    Field(FieldDecl),
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub return_ty: Handle<Expr>,
    pub return_semantic: Option<String>,
    /// Parameter declarations, always `DeclKind::Var` with a `*Param` kind.
    pub params: Vec<Handle<Decl>>,
    pub body: Vec<Handle<Stmt>>,
    pub attributes: Vec<Attribute>,

    /// All local variables of the body, for alloca-in-entry allocation.
    /// Filled by the analyzer.
    pub locals: Vec<Handle<Decl>>,
    /// Whether this function is reachable: called somewhere, or it is the
    /// requested entry point.
    pub called: bool,
}

#[derive(Debug)]
pub struct VarDecl {
    pub kind: VarKind,
    pub ty_expr: Handle<Expr>,
    pub init: Option<Handle<Expr>>,
    pub semantic: Option<String>,
    pub register: Option<Register>,
    /// Set for the global generated by `cbuffer` sugar; its struct members
    /// are injected into the global scope.
    pub from_cbuffer: bool,
}

#[derive(Debug)]
pub struct ConstDecl {
    pub ty_expr: Handle<Expr>,
    pub init: Handle<Expr>,
}

#[derive(Debug)]
pub struct StructDecl {
    /// Field declarations, always `DeclKind::Field`.
    pub fields: Vec<Handle<Decl>>,
}

#[derive(Debug)]
pub struct FieldDecl {
    pub ty_expr: Handle<Expr>,
    pub index: u32,
    pub semantic: Option<String>,
}

/// A statement.
#[derive(Debug)]
pub struct Stmt {
    pub location: Location,
    pub kind: StmtKind,
}

#[derive(Debug)]
pub enum StmtKind {
    Decl(Handle<Decl>),
    Expr(Handle<Expr>),
    Assign {
        target: Handle<Expr>,
        value: Handle<Expr>,
    },
    Return(Option<Handle<Expr>>),
    Discard,
    Break,
    Continue,
    Block(Vec<Handle<Stmt>>),
    If {
        condition: Handle<Expr>,
        accept: Handle<Stmt>,
        reject: Option<Handle<Stmt>>,
    },
    While {
        condition: Handle<Expr>,
        body: Handle<Stmt>,
    },
    DoWhile {
        body: Handle<Stmt>,
        condition: Handle<Expr>,
    },
    For {
        init: Option<Handle<Stmt>>,
        condition: Option<Handle<Expr>>,
        /// Either an expression or an assignment statement.
        step: Option<Handle<Stmt>>,
        body: Handle<Stmt>,
    },
}

/// Operation that can be applied on a single value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnaryOp {
    Negate,
    Not,
    BitNot,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

/// Operation that can be applied on two values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    ExclusiveOr,
    InclusiveOr,
    LogicalAnd,
    LogicalOr,
    ShiftLeft,
    ShiftRight,
}

/// A literal token value carried by a primary expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// A type written in expression position: constructors, resource
/// declarations and declaration heads all go through these.
#[derive(Clone, Debug)]
pub enum TypeRef {
    Void,
    Scalar {
        kind: ScalarKind,
        width: Bytes,
    },
    Vector {
        kind: ScalarKind,
        width: Bytes,
        size: u32,
    },
    Matrix {
        kind: ScalarKind,
        width: Bytes,
        rows: u32,
        columns: u32,
    },
    Sampler,
    Texture {
        dim: spirv::Dim,
        /// `Texture2D<float4>`; defaults to `float4` when absent.
        sampled: Option<Handle<Expr>>,
    },
    ConstantBuffer {
        base: Handle<Expr>,
    },
    StructuredBuffer {
        base: Handle<Expr>,
        read_write: bool,
    },
}

/// An expression. Analysis results (`ty`, `as_type`, `assignable`,
/// `const_int`) are attached in place by the analyzer.
#[derive(Debug)]
pub struct Expr {
    pub location: Location,
    pub kind: ExprKind,
    pub ty: Option<Handle<Type>>,
    /// Set when this expression denotes a type.
    pub as_type: Option<Handle<Type>>,
    pub assignable: bool,
    /// Constant-integer resolution for trivially foldable expressions.
    pub const_int: Option<i64>,
}

impl Expr {
    pub fn new(location: Location, kind: ExprKind) -> Self {
        Expr {
            location,
            kind,
            ty: None,
            as_type: None,
            assignable: false,
            const_int: None,
        }
    }
}

#[derive(Debug)]
pub enum ExprKind {
    Literal(Literal),
    Ident {
        name: String,
        /// The declaration this identifier refers to. Resolved by the
        /// analyzer; stays `None` for swizzle components.
        decl: Option<Handle<Decl>>,
        /// Component indices when this identifier is a swizzle.
        swizzle: Option<Vec<u32>>,
    },
    /// `base.a.b.xyz` as a base plus a chain of identifiers.
    Access {
        base: Handle<Expr>,
        chain: Vec<Handle<Expr>>,
    },
    Subscript {
        base: Handle<Expr>,
        index: Handle<Expr>,
    },
    TypeRef(TypeRef),
    Call {
        callee: Handle<Expr>,
        args: Vec<Handle<Expr>>,
        /// The receiver for method-call syntax (`tex.Sample(...)`).
        object: Option<Handle<Expr>>,
    },
    IntrinsicCall {
        op: Intrinsic,
        args: Vec<Handle<Expr>>,
    },
    BarrierCall {
        scope: BarrierScope,
        group_sync: bool,
    },
    Unary {
        op: UnaryOp,
        expr: Handle<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Handle<Expr>,
        right: Handle<Expr>,
    },
}

/// Where a synthesized stage I/O variable takes its value from, in terms
/// of the user-written entry function.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IoOrigin {
    /// The whole parameter at the given index.
    Param(usize),
    /// One member of a struct-typed parameter.
    ParamMember(usize, u32),
    /// The whole return value.
    ReturnValue,
    /// One member of a struct return value.
    ReturnMember(u32),
    /// The final value of an `out`/`inout` parameter.
    OutParam(usize),
    /// One member of a struct-typed `out` parameter.
    OutParamMember(usize, u32),
}

/// A synthesized stage input or output variable.
#[derive(Debug)]
pub struct StageIo {
    pub name: String,
    pub ty: Handle<Type>,
    pub decorations: Vec<Decoration>,
    pub origin: IoOrigin,
}

/// The requested entry point after stage I/O lowering.
#[derive(Debug)]
pub struct EntryPoint {
    pub function: Handle<Decl>,
    pub stage: ShaderStage,
    pub workgroup_size: [u32; 3],
    pub inputs: Vec<StageIo>,
    pub outputs: Vec<StageIo>,
}
