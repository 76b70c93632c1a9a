//! Recursive descent parser producing the untyped AST.
//!
//! Expressions use precedence climbing with the usual C operator levels,
//! extended with `.` member/swizzle access and `[...]` subscripts. The
//! parser does not interpret attributes, semantics or register bindings;
//! it captures them as raw data for the analyzer.

use super::{
    ast::*,
    intrinsics,
    lex::{Token, TokenValue},
};
use crate::{
    arena::Handle,
    Diagnostics, Location,
};

use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum ParseError {
    #[error("expected {expected}, found {found:?}")]
    Unexpected {
        location: Location,
        expected: &'static str,
        found: TokenValue,
    },
    #[error("expected {expected}, found the end of the source")]
    UnexpectedEnd { expected: &'static str },
    #[error("invalid register `{name}`")]
    InvalidRegister { location: Location, name: String },
}

impl ParseError {
    fn location(&self) -> Location {
        match *self {
            ParseError::Unexpected { location, .. }
            | ParseError::InvalidRegister { location, .. } => location,
            ParseError::UnexpectedEnd { .. } => Location::default(),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    unit: TranslationUnit,
    diagnostics: &'a mut Diagnostics,
}

/// Parse a token stream into a translation unit.
///
/// Parse errors are reported through `diagnostics`; after each one the
/// parser skips ahead to the next `;`, `}` or top-level keyword and
/// continues, so one run surfaces as many problems as possible.
pub fn parse(tokens: &[Token], diagnostics: &mut Diagnostics) -> TranslationUnit {
    let mut parser = Parser {
        tokens,
        pos: 0,
        unit: TranslationUnit::default(),
        diagnostics,
    };

    while parser.peek().is_some() {
        match parser.global_decl() {
            Ok(Some(decl)) => parser.unit.globals.push(decl),
            Ok(None) => {}
            Err(error) => {
                let location = if error.location() == Location::default() {
                    parser.previous_location()
                } else {
                    error.location()
                };
                parser.diagnostics.add(location, error.to_string());
                parser.recover_global();
            }
        }
    }

    parser.unit
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&TokenValue> {
        self.tokens.get(self.pos).map(|t| &t.value)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenValue> {
        self.tokens.get(self.pos + offset).map(|t| &t.value)
    }

    fn location(&self) -> Location {
        self.tokens
            .get(self.pos)
            .map(|t| t.location)
            .unwrap_or_else(|| self.previous_location())
    }

    fn previous_location(&self) -> Location {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.location)
            .unwrap_or_default()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, value: TokenValue, expected: &'static str) -> Result<Location, ParseError> {
        match self.bump() {
            Some(token) if token.value == value => Ok(token.location),
            Some(token) => Err(ParseError::Unexpected {
                location: token.location,
                expected,
                found: token.value,
            }),
            None => Err(ParseError::UnexpectedEnd { expected }),
        }
    }

    fn skip(&mut self, value: &TokenValue) -> bool {
        if self.peek() == Some(value) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<(String, Location), ParseError> {
        match self.bump() {
            Some(Token {
                value: TokenValue::Ident(name),
                location,
            }) => Ok((name, location)),
            Some(token) => Err(ParseError::Unexpected {
                location: token.location,
                expected,
                found: token.value,
            }),
            None => Err(ParseError::UnexpectedEnd { expected }),
        }
    }

    /// Skip to the next `;`, `}` or token that can start a top-level
    /// declaration.
    fn recover_global(&mut self) {
        while let Some(value) = self.peek() {
            match *value {
                TokenValue::Semicolon | TokenValue::RBrace => {
                    self.pos += 1;
                    return;
                }
                TokenValue::Struct
                | TokenValue::CBuffer
                | TokenValue::Static
                | TokenValue::GroupShared => return,
                _ => self.pos += 1,
            }
        }
    }

    /// Skip to the next `;` (consuming it) or `}` (leaving it).
    fn recover_stmt(&mut self) {
        while let Some(value) = self.peek() {
            match *value {
                TokenValue::Semicolon => {
                    self.pos += 1;
                    return;
                }
                TokenValue::RBrace => return,
                _ => self.pos += 1,
            }
        }
    }

    fn add_expr(&mut self, location: Location, kind: ExprKind) -> Handle<Expr> {
        self.unit.exprs.append(Expr::new(location, kind))
    }

    fn add_stmt(&mut self, location: Location, kind: StmtKind) -> Handle<Stmt> {
        self.unit.stmts.append(Stmt { location, kind })
    }

    //
    // Declarations
    //

    fn global_decl(&mut self) -> Result<Option<Handle<Decl>>, ParseError> {
        let attributes = self.attributes()?;

        match self.peek() {
            Some(TokenValue::Struct) => self.struct_decl().map(Some),
            Some(TokenValue::CBuffer) => self.cbuffer_decl().map(Some),
            Some(TokenValue::Static) | Some(TokenValue::Const) => self.const_decl().map(Some),
            Some(TokenValue::GroupShared) => {
                self.pos += 1;
                self.var_decl(VarKind::GroupShared).map(Some)
            }
            Some(_) => {
                let ty_expr = self.primary()?;
                let (name, location) = self.expect_ident("a declaration name")?;
                if self.peek() == Some(&TokenValue::LParen) {
                    self.function_decl(ty_expr, name, location, attributes)
                        .map(Some)
                } else {
                    self.var_decl_tail(ty_expr, name, location, VarKind::Uniform)
                        .map(Some)
                }
            }
            None => Ok(None),
        }
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>, ParseError> {
        let mut attributes = Vec::new();
        while self.peek() == Some(&TokenValue::LBracket) {
            self.pos += 1;
            let (name, location) = self.expect_ident("an attribute name")?;
            let mut args = Vec::new();
            if self.skip(&TokenValue::LParen) {
                if self.peek() != Some(&TokenValue::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if !self.skip(&TokenValue::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenValue::RParen, "`)`")?;
            }
            self.expect(TokenValue::RBracket, "`]`")?;
            attributes.push(Attribute {
                name,
                location,
                args,
            });
        }
        Ok(attributes)
    }

    fn struct_decl(&mut self) -> Result<Handle<Decl>, ParseError> {
        self.expect(TokenValue::Struct, "`struct`")?;
        let (name, location) = self.expect_ident("a struct name")?;
        let fields = self.struct_body()?;
        self.expect(TokenValue::Semicolon, "`;`")?;

        Ok(self.unit.decls.append(Decl {
            name,
            location,
            kind: DeclKind::Struct(StructDecl { fields }),
            ty: None,
            decorations: Vec::new(),
        }))
    }

    fn struct_body(&mut self) -> Result<Vec<Handle<Decl>>, ParseError> {
        self.expect(TokenValue::LBrace, "`{`")?;
        let mut fields = Vec::new();
        while self.peek() != Some(&TokenValue::RBrace) {
            let ty_expr = self.primary()?;
            let (name, location) = self.expect_ident("a field name")?;
            let semantic = if self.skip(&TokenValue::Colon) {
                Some(self.expect_ident("a semantic")?.0)
            } else {
                None
            };
            self.expect(TokenValue::Semicolon, "`;`")?;

            let index = fields.len() as u32;
            fields.push(self.unit.decls.append(Decl {
                name,
                location,
                kind: DeclKind::Field(FieldDecl {
                    ty_expr,
                    index,
                    semantic,
                }),
                ty: None,
                decorations: Vec::new(),
            }));
        }
        self.expect(TokenValue::RBrace, "`}`")?;
        Ok(fields)
    }

    /// `cbuffer NAME { fields };` — sugar for an anonymous struct plus a
    /// `ConstantBuffer` global whose members are accessed unqualified.
    fn cbuffer_decl(&mut self) -> Result<Handle<Decl>, ParseError> {
        self.expect(TokenValue::CBuffer, "`cbuffer`")?;
        let (name, location) = self.expect_ident("a cbuffer name")?;
        let register = if self.skip(&TokenValue::Colon) {
            Some(self.register()?)
        } else {
            None
        };
        let fields = self.struct_body()?;
        self.expect(TokenValue::Semicolon, "`;`")?;

        let struct_decl = self.unit.decls.append(Decl {
            name: name.clone(),
            location,
            kind: DeclKind::Struct(StructDecl { fields }),
            ty: None,
            decorations: Vec::new(),
        });
        // The struct registers like any other type declaration; the
        // variable follows it in the global list.
        self.unit.globals.push(struct_decl);

        let base = self.add_expr(
            location,
            ExprKind::Ident {
                name,
                decl: Some(struct_decl),
                swizzle: None,
            },
        );
        let ty_expr = self.add_expr(location, ExprKind::TypeRef(TypeRef::ConstantBuffer { base }));

        Ok(self.unit.decls.append(Decl {
            // The variable shares the name; field lookups resolve through
            // the analyzer's cbuffer member table.
            name: self.unit.decls[struct_decl].name.clone(),
            location,
            kind: DeclKind::Var(VarDecl {
                kind: VarKind::Uniform,
                ty_expr,
                init: None,
                semantic: None,
                register,
                from_cbuffer: true,
            }),
            ty: None,
            decorations: Vec::new(),
        }))
    }

    fn const_decl(&mut self) -> Result<Handle<Decl>, ParseError> {
        self.skip(&TokenValue::Static);
        self.expect(TokenValue::Const, "`const`")?;
        let ty_expr = self.primary()?;
        let (name, location) = self.expect_ident("a constant name")?;
        self.expect(TokenValue::Assign, "`=`")?;
        let init = self.expr()?;
        self.expect(TokenValue::Semicolon, "`;`")?;

        Ok(self.unit.decls.append(Decl {
            name,
            location,
            kind: DeclKind::Const(ConstDecl { ty_expr, init }),
            ty: None,
            decorations: Vec::new(),
        }))
    }

    fn var_decl(&mut self, kind: VarKind) -> Result<Handle<Decl>, ParseError> {
        let ty_expr = self.primary()?;
        let (name, location) = self.expect_ident("a variable name")?;
        self.var_decl_tail(ty_expr, name, location, kind)
    }

    fn var_decl_tail(
        &mut self,
        ty_expr: Handle<Expr>,
        name: String,
        location: Location,
        kind: VarKind,
    ) -> Result<Handle<Decl>, ParseError> {
        let mut semantic = None;
        let mut register = None;
        if self.skip(&TokenValue::Colon) {
            if self.peek_register() {
                register = Some(self.register()?);
            } else {
                semantic = Some(self.expect_ident("a semantic")?.0);
            }
        }
        let init = if self.skip(&TokenValue::Assign) {
            Some(self.expr()?)
        } else {
            None
        };
        self.expect(TokenValue::Semicolon, "`;`")?;

        Ok(self.unit.decls.append(Decl {
            name,
            location,
            kind: DeclKind::Var(VarDecl {
                kind,
                ty_expr,
                init,
                semantic,
                register,
                from_cbuffer: false,
            }),
            ty: None,
            decorations: Vec::new(),
        }))
    }

    fn peek_register(&self) -> bool {
        matches!(self.peek(), Some(TokenValue::Ident(name)) if name == "register")
    }

    /// `register(xN [, spaceM])`
    fn register(&mut self) -> Result<Register, ParseError> {
        let _ = self.expect_ident("`register`")?;
        self.expect(TokenValue::LParen, "`(`")?;
        let (slot, location) = self.expect_ident("a register slot")?;

        let class = slot.chars().next().unwrap_or('\0');
        let index = slot[class.len_utf8()..]
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidRegister {
                location,
                name: slot.clone(),
            })?;

        let mut space = 0;
        if self.skip(&TokenValue::Comma) {
            let (space_name, location) = self.expect_ident("a register space")?;
            space = space_name
                .strip_prefix("space")
                .and_then(|digits| digits.parse::<u32>().ok())
                .ok_or(ParseError::InvalidRegister {
                    location,
                    name: space_name,
                })?;
        }
        self.expect(TokenValue::RParen, "`)`")?;

        Ok(Register {
            class,
            index,
            space,
        })
    }

    fn function_decl(
        &mut self,
        return_ty: Handle<Expr>,
        name: String,
        location: Location,
        attributes: Vec<Attribute>,
    ) -> Result<Handle<Decl>, ParseError> {
        self.expect(TokenValue::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.peek() != Some(&TokenValue::RParen) {
            loop {
                params.push(self.param_decl()?);
                if !self.skip(&TokenValue::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenValue::RParen, "`)`")?;

        let return_semantic = if self.skip(&TokenValue::Colon) {
            Some(self.expect_ident("a semantic")?.0)
        } else {
            None
        };

        self.expect(TokenValue::LBrace, "`{`")?;
        let mut body = Vec::new();
        while self.peek().is_some() && self.peek() != Some(&TokenValue::RBrace) {
            match self.stmt() {
                Ok(stmt) => body.push(stmt),
                Err(error) => {
                    let location = if error.location() == Location::default() {
                        self.previous_location()
                    } else {
                        error.location()
                    };
                    self.diagnostics.add(location, error.to_string());
                    self.recover_stmt();
                }
            }
        }
        self.expect(TokenValue::RBrace, "`}`")?;

        Ok(self.unit.decls.append(Decl {
            name,
            location,
            kind: DeclKind::Function(FunctionDecl {
                return_ty,
                return_semantic,
                params,
                body,
                attributes,
                locals: Vec::new(),
                called: false,
            }),
            ty: None,
            decorations: Vec::new(),
        }))
    }

    fn param_decl(&mut self) -> Result<Handle<Decl>, ParseError> {
        let kind = match self.peek() {
            Some(TokenValue::In) => {
                self.pos += 1;
                VarKind::InParam
            }
            Some(TokenValue::Out) => {
                self.pos += 1;
                VarKind::OutParam
            }
            Some(TokenValue::InOut) => {
                self.pos += 1;
                VarKind::InOutParam
            }
            _ => VarKind::InParam,
        };
        let ty_expr = self.primary()?;
        let (name, location) = self.expect_ident("a parameter name")?;
        let semantic = if self.skip(&TokenValue::Colon) {
            Some(self.expect_ident("a semantic")?.0)
        } else {
            None
        };

        Ok(self.unit.decls.append(Decl {
            name,
            location,
            kind: DeclKind::Var(VarDecl {
                kind,
                ty_expr,
                init: None,
                semantic,
                register: None,
                from_cbuffer: false,
            }),
            ty: None,
            decorations: Vec::new(),
        }))
    }

    //
    // Statements
    //

    fn stmt(&mut self) -> Result<Handle<Stmt>, ParseError> {
        let location = self.location();
        match self.peek() {
            Some(TokenValue::LBrace) => {
                self.pos += 1;
                let mut stmts = Vec::new();
                while self.peek().is_some() && self.peek() != Some(&TokenValue::RBrace) {
                    stmts.push(self.stmt()?);
                }
                self.expect(TokenValue::RBrace, "`}`")?;
                Ok(self.add_stmt(location, StmtKind::Block(stmts)))
            }
            Some(TokenValue::If) => {
                self.pos += 1;
                self.expect(TokenValue::LParen, "`(`")?;
                let condition = self.expr()?;
                self.expect(TokenValue::RParen, "`)`")?;
                let accept = self.stmt()?;
                let reject = if self.skip(&TokenValue::Else) {
                    Some(self.stmt()?)
                } else {
                    None
                };
                Ok(self.add_stmt(
                    location,
                    StmtKind::If {
                        condition,
                        accept,
                        reject,
                    },
                ))
            }
            Some(TokenValue::While) => {
                self.pos += 1;
                self.expect(TokenValue::LParen, "`(`")?;
                let condition = self.expr()?;
                self.expect(TokenValue::RParen, "`)`")?;
                let body = self.stmt()?;
                Ok(self.add_stmt(location, StmtKind::While { condition, body }))
            }
            Some(TokenValue::Do) => {
                self.pos += 1;
                let body = self.stmt()?;
                self.expect(TokenValue::While, "`while`")?;
                self.expect(TokenValue::LParen, "`(`")?;
                let condition = self.expr()?;
                self.expect(TokenValue::RParen, "`)`")?;
                self.expect(TokenValue::Semicolon, "`;`")?;
                Ok(self.add_stmt(location, StmtKind::DoWhile { body, condition }))
            }
            Some(TokenValue::For) => {
                self.pos += 1;
                self.expect(TokenValue::LParen, "`(`")?;
                let init = if self.skip(&TokenValue::Semicolon) {
                    None
                } else {
                    Some(self.simple_stmt()?)
                };
                let condition = if self.peek() == Some(&TokenValue::Semicolon) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(TokenValue::Semicolon, "`;`")?;
                let step = if self.peek() == Some(&TokenValue::RParen) {
                    None
                } else {
                    let location = self.location();
                    let kind = self.expr_or_assign()?;
                    Some(self.add_stmt(location, kind))
                };
                self.expect(TokenValue::RParen, "`)`")?;
                let body = self.stmt()?;
                Ok(self.add_stmt(
                    location,
                    StmtKind::For {
                        init,
                        condition,
                        step,
                        body,
                    },
                ))
            }
            Some(TokenValue::Return) => {
                self.pos += 1;
                let value = if self.peek() == Some(&TokenValue::Semicolon) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(TokenValue::Semicolon, "`;`")?;
                Ok(self.add_stmt(location, StmtKind::Return(value)))
            }
            Some(TokenValue::Break) => {
                self.pos += 1;
                self.expect(TokenValue::Semicolon, "`;`")?;
                Ok(self.add_stmt(location, StmtKind::Break))
            }
            Some(TokenValue::Continue) => {
                self.pos += 1;
                self.expect(TokenValue::Semicolon, "`;`")?;
                Ok(self.add_stmt(location, StmtKind::Continue))
            }
            Some(TokenValue::Discard) => {
                self.pos += 1;
                self.expect(TokenValue::Semicolon, "`;`")?;
                Ok(self.add_stmt(location, StmtKind::Discard))
            }
            Some(TokenValue::Static) | Some(TokenValue::Const) => {
                let decl = self.const_decl()?;
                Ok(self.add_stmt(location, StmtKind::Decl(decl)))
            }
            _ => self.simple_stmt(),
        }
    }

    /// A variable declaration or an expression/assignment, with its `;`.
    fn simple_stmt(&mut self) -> Result<Handle<Stmt>, ParseError> {
        let location = self.location();
        if self.at_decl_start() {
            let decl = self.var_decl(VarKind::Plain)?;
            Ok(self.add_stmt(location, StmtKind::Decl(decl)))
        } else {
            let kind = self.expr_or_assign()?;
            self.expect(TokenValue::Semicolon, "`;`")?;
            Ok(self.add_stmt(location, kind))
        }
    }

    fn at_decl_start(&self) -> bool {
        match self.peek() {
            Some(TokenValue::Scalar { .. })
            | Some(TokenValue::Vector { .. })
            | Some(TokenValue::Matrix { .. })
            | Some(TokenValue::Texture(_))
            | Some(TokenValue::SamplerState)
            | Some(TokenValue::ConstantBuffer)
            | Some(TokenValue::StructuredBuffer)
            | Some(TokenValue::RwStructuredBuffer) => true,
            Some(TokenValue::Ident(_)) => {
                matches!(self.peek_at(1), Some(TokenValue::Ident(_)))
            }
            _ => false,
        }
    }

    /// Parse an expression, optionally followed by a (compound)
    /// assignment. Compound forms desugar to a binary operation on the
    /// target.
    fn expr_or_assign(&mut self) -> Result<StmtKind, ParseError> {
        let target = self.expr()?;

        let op = match self.peek() {
            Some(TokenValue::Assign) => None,
            Some(TokenValue::AddAssign) => Some(BinaryOp::Add),
            Some(TokenValue::SubAssign) => Some(BinaryOp::Subtract),
            Some(TokenValue::MulAssign) => Some(BinaryOp::Multiply),
            Some(TokenValue::DivAssign) => Some(BinaryOp::Divide),
            Some(TokenValue::ModAssign) => Some(BinaryOp::Modulo),
            Some(TokenValue::AndAssign) => Some(BinaryOp::And),
            Some(TokenValue::OrAssign) => Some(BinaryOp::InclusiveOr),
            Some(TokenValue::XorAssign) => Some(BinaryOp::ExclusiveOr),
            Some(TokenValue::ShiftLeftAssign) => Some(BinaryOp::ShiftLeft),
            Some(TokenValue::ShiftRightAssign) => Some(BinaryOp::ShiftRight),
            _ => return Ok(StmtKind::Expr(target)),
        };
        let location = self.location();
        self.pos += 1;
        let rhs = self.expr()?;

        let value = match op {
            None => rhs,
            Some(op) => self.add_expr(
                location,
                ExprKind::Binary {
                    op,
                    left: target,
                    right: rhs,
                },
            ),
        };
        Ok(StmtKind::Assign { target, value })
    }

    //
    // Expressions
    //

    fn expr(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::LogicalOr => Some(BinaryOp::LogicalOr),
                _ => None,
            },
            Self::logical_and,
        )
    }

    fn binary_group(
        &mut self,
        classify: fn(&TokenValue) -> Option<BinaryOp>,
        next: fn(&mut Self) -> Result<Handle<Expr>, ParseError>,
    ) -> Result<Handle<Expr>, ParseError> {
        let mut left = next(self)?;
        while let Some(op) = self.peek().and_then(classify) {
            let location = self.location();
            self.pos += 1;
            let right = next(self)?;
            left = self.add_expr(location, ExprKind::Binary { op, left, right });
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::LogicalAnd => Some(BinaryOp::LogicalAnd),
                _ => None,
            },
            Self::bit_or,
        )
    }

    fn bit_or(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::BitOr => Some(BinaryOp::InclusiveOr),
                _ => None,
            },
            Self::bit_xor,
        )
    }

    fn bit_xor(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::BitXor => Some(BinaryOp::ExclusiveOr),
                _ => None,
            },
            Self::bit_and,
        )
    }

    fn bit_and(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::BitAnd => Some(BinaryOp::And),
                _ => None,
            },
            Self::equality,
        )
    }

    fn equality(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::Equal => Some(BinaryOp::Equal),
                TokenValue::NotEqual => Some(BinaryOp::NotEqual),
                _ => None,
            },
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::Less => Some(BinaryOp::Less),
                TokenValue::LessEqual => Some(BinaryOp::LessEqual),
                TokenValue::Greater => Some(BinaryOp::Greater),
                TokenValue::GreaterEqual => Some(BinaryOp::GreaterEqual),
                _ => None,
            },
            Self::shift,
        )
    }

    fn shift(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::ShiftLeft => Some(BinaryOp::ShiftLeft),
                TokenValue::ShiftRight => Some(BinaryOp::ShiftRight),
                _ => None,
            },
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::Add => Some(BinaryOp::Add),
                TokenValue::Sub => Some(BinaryOp::Subtract),
                _ => None,
            },
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Handle<Expr>, ParseError> {
        self.binary_group(
            |token| match *token {
                TokenValue::Mul => Some(BinaryOp::Multiply),
                TokenValue::Div => Some(BinaryOp::Divide),
                TokenValue::Mod => Some(BinaryOp::Modulo),
                _ => None,
            },
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Handle<Expr>, ParseError> {
        let location = self.location();
        let op = match self.peek() {
            Some(TokenValue::Sub) => UnaryOp::Negate,
            Some(TokenValue::Not) => UnaryOp::Not,
            Some(TokenValue::BitNot) => UnaryOp::BitNot,
            Some(TokenValue::Increment) => UnaryOp::PreIncrement,
            Some(TokenValue::Decrement) => UnaryOp::PreDecrement,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let expr = self.unary()?;
        Ok(self.add_expr(location, ExprKind::Unary { op, expr }))
    }

    fn postfix(&mut self) -> Result<Handle<Expr>, ParseError> {
        let mut expr = self.primary()?;

        loop {
            let location = self.location();
            match self.peek() {
                Some(TokenValue::Period) => {
                    self.pos += 1;
                    let (name, ident_location) = self.expect_ident("a member name")?;
                    if self.peek() == Some(&TokenValue::LParen) {
                        // Method call: the receiver becomes the object.
                        let callee = self.add_expr(
                            ident_location,
                            ExprKind::Ident {
                                name,
                                decl: None,
                                swizzle: None,
                            },
                        );
                        let args = self.call_args()?;
                        expr = self.add_expr(
                            location,
                            ExprKind::Call {
                                callee,
                                args,
                                object: Some(expr),
                            },
                        );
                    } else {
                        let ident = self.add_expr(
                            ident_location,
                            ExprKind::Ident {
                                name,
                                decl: None,
                                swizzle: None,
                            },
                        );
                        expr = self.append_access(expr, ident);
                    }
                }
                Some(TokenValue::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(TokenValue::RBracket, "`]`")?;
                    expr = self.add_expr(location, ExprKind::Subscript { base: expr, index });
                }
                Some(TokenValue::LParen) => {
                    expr = self.call(expr)?;
                }
                Some(TokenValue::Increment) => {
                    self.pos += 1;
                    expr = self.add_expr(
                        location,
                        ExprKind::Unary {
                            op: UnaryOp::PostIncrement,
                            expr,
                        },
                    );
                }
                Some(TokenValue::Decrement) => {
                    self.pos += 1;
                    expr = self.add_expr(
                        location,
                        ExprKind::Unary {
                            op: UnaryOp::PostDecrement,
                            expr,
                        },
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Extend an existing access chain, or start a new one.
    fn append_access(&mut self, base: Handle<Expr>, ident: Handle<Expr>) -> Handle<Expr> {
        if let ExprKind::Access { ref mut chain, .. } = self.unit.exprs.get_mut(base).kind {
            chain.push(ident);
            return base;
        }
        let location = self.unit.exprs[base].location;
        self.add_expr(
            location,
            ExprKind::Access {
                base,
                chain: vec![ident],
            },
        )
    }

    fn call_args(&mut self) -> Result<Vec<Handle<Expr>>, ParseError> {
        self.expect(TokenValue::LParen, "`(`")?;
        let mut args = Vec::new();
        if self.peek() != Some(&TokenValue::RParen) {
            loop {
                args.push(self.expr()?);
                if !self.skip(&TokenValue::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenValue::RParen, "`)`")?;
        Ok(args)
    }

    fn call(&mut self, callee: Handle<Expr>) -> Result<Handle<Expr>, ParseError> {
        let location = self.unit.exprs[callee].location;
        let args = self.call_args()?;

        // Intrinsic and barrier names are classified here; anything else
        // stays a regular call for the analyzer to resolve.
        let callee_name = match self.unit.exprs[callee].kind {
            ExprKind::Ident { ref name, .. } => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = callee_name {
            if let Some((scope, group_sync)) = intrinsics::lookup_barrier(&name) {
                return Ok(self.add_expr(location, ExprKind::BarrierCall { scope, group_sync }));
            }
            if let Some(op) = intrinsics::lookup(&name) {
                return Ok(self.add_expr(location, ExprKind::IntrinsicCall { op, args }));
            }
        }

        Ok(self.add_expr(
            location,
            ExprKind::Call {
                callee,
                args,
                object: None,
            },
        ))
    }

    fn primary(&mut self) -> Result<Handle<Expr>, ParseError> {
        let token = match self.bump() {
            Some(token) => token,
            None => {
                return Err(ParseError::UnexpectedEnd {
                    expected: "an expression",
                })
            }
        };
        let location = token.location;

        let kind = match token.value {
            TokenValue::Int(value) => ExprKind::Literal(Literal::Int(value)),
            TokenValue::Float(value) => ExprKind::Literal(Literal::Float(value)),
            TokenValue::True => ExprKind::Literal(Literal::Bool(true)),
            TokenValue::False => ExprKind::Literal(Literal::Bool(false)),
            TokenValue::Ident(name) => ExprKind::Ident {
                name,
                decl: None,
                swizzle: None,
            },
            TokenValue::Void => ExprKind::TypeRef(TypeRef::Void),
            TokenValue::Scalar { kind, width } => ExprKind::TypeRef(TypeRef::Scalar { kind, width }),
            TokenValue::Vector { kind, width, size } => {
                ExprKind::TypeRef(TypeRef::Vector { kind, width, size })
            }
            TokenValue::Matrix {
                kind,
                width,
                rows,
                columns,
            } => ExprKind::TypeRef(TypeRef::Matrix {
                kind,
                width,
                rows,
                columns,
            }),
            TokenValue::SamplerState => ExprKind::TypeRef(TypeRef::Sampler),
            TokenValue::Texture(dim) => {
                let sampled = if self.skip(&TokenValue::Less) {
                    let sampled = self.primary()?;
                    self.expect(TokenValue::Greater, "`>`")?;
                    Some(sampled)
                } else {
                    None
                };
                ExprKind::TypeRef(TypeRef::Texture { dim, sampled })
            }
            TokenValue::ConstantBuffer => {
                self.expect(TokenValue::Less, "`<`")?;
                let base = self.primary()?;
                self.expect(TokenValue::Greater, "`>`")?;
                ExprKind::TypeRef(TypeRef::ConstantBuffer { base })
            }
            TokenValue::StructuredBuffer | TokenValue::RwStructuredBuffer => {
                let read_write = token.value == TokenValue::RwStructuredBuffer;
                self.expect(TokenValue::Less, "`<`")?;
                let base = self.primary()?;
                self.expect(TokenValue::Greater, "`>`")?;
                ExprKind::TypeRef(TypeRef::StructuredBuffer { base, read_write })
            }
            TokenValue::LParen => {
                let expr = self.expr()?;
                self.expect(TokenValue::RParen, "`)`")?;
                return Ok(expr);
            }
            found => {
                return Err(ParseError::Unexpected {
                    location,
                    expected: "an expression",
                    found,
                })
            }
        };

        Ok(self.add_expr(location, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::hlsl::lex;

    fn parse_source(source: &str) -> (TranslationUnit, usize) {
        let mut diagnostics = Diagnostics::new("test");
        let tokens = lex::tokenize(source, &mut diagnostics);
        let unit = parse(&tokens, &mut diagnostics);
        (unit, diagnostics.len())
    }

    #[test]
    fn function_with_body() {
        let (unit, errors) = parse_source(
            "float4 main(float3 p : POSITION) : SV_Position { return float4(p, 1.0); }",
        );
        assert_eq!(errors, 0);
        assert_eq!(unit.globals.len(), 1);
        match unit.decls[unit.globals[0]].kind {
            DeclKind::Function(ref function) => {
                assert_eq!(function.params.len(), 1);
                assert_eq!(function.body.len(), 1);
                assert_eq!(function.return_semantic.as_deref(), Some("SV_Position"));
            }
            ref other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn struct_and_resources() {
        let (unit, errors) = parse_source(
            "struct V { float4 pos : SV_Position; float2 uv : TEXCOORD0; };\n\
             Texture2D tex : register(t0, space1);\n\
             SamplerState samp;\n\
             RWStructuredBuffer<uint> counters;",
        );
        assert_eq!(errors, 0);
        assert_eq!(unit.globals.len(), 4);
        match unit.decls[unit.globals[1]].kind {
            DeclKind::Var(ref var) => {
                let register = var.register.as_ref().map(|r| (r.class, r.index, r.space));
                assert_eq!(register, Some(('t', 0, 1)));
            }
            ref other => panic!("expected a variable, got {:?}", other),
        }
    }

    #[test]
    fn compound_assignment_desugars() {
        let (unit, errors) = parse_source("void f() { int x = 0; x += 2; }");
        assert_eq!(errors, 0);
        let assign = unit
            .stmts
            .iter()
            .find_map(|(_, stmt)| match stmt.kind {
                StmtKind::Assign { value, .. } => Some(value),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            unit.exprs[assign].kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn method_call_keeps_receiver() {
        let (unit, errors) = parse_source("float4 f() { return tex.Sample(s, uv); }");
        assert_eq!(errors, 0);
        let call = unit
            .exprs
            .iter()
            .find(|(_, e)| matches!(e.kind, ExprKind::Call { object: Some(_), .. }));
        assert!(call.is_some());
    }

    #[test]
    fn error_recovery_continues() {
        let (unit, errors) = parse_source("float4 ; void f() { }");
        assert!(errors > 0);
        assert_eq!(unit.globals.len(), 1);
    }

    #[test]
    fn for_loop_shape() {
        let (unit, errors) = parse_source("void f() { for (int i = 0; i < 4; ++i) { } }");
        assert_eq!(errors, 0);
        let found = unit.stmts.iter().any(|(_, stmt)| {
            matches!(
                stmt.kind,
                StmtKind::For {
                    init: Some(_),
                    condition: Some(_),
                    step: Some(_),
                    ..
                }
            )
        });
        assert!(found);
    }
}
