//! Compile-time expression evaluator.
//!
//! Array sizes and generic arguments are postfix token sequences evaluated on
//! a stack. Every value on the stack is an [`Operand`]: either a constant or a
//! type reference, the latter only meaningful to `sizeof`.

use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use crate::ast::{Expr, FieldDef, StructDef, Token, TypeKind, TypeRef};
use crate::error::{CompileError, CompileResult};
use crate::layout::MaxSize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Number(OrderedFloat<f64>),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Const(Constant),
    /// Fully substituted: contains no generic parameters bound in the current scope.
    Type(TypeRef),
}

/// Generic parameter name ⇒ bound argument, for one instantiation.
pub type Bindings = IndexMap<String, Operand>;

impl Operand {
    pub fn number(n: f64) -> Self {
        Operand::Const(Constant::Number(OrderedFloat(n)))
    }
}

/// Resolves `sizeof` operands.
pub trait TypeSizer {
    fn size_of(&mut self, r: &TypeRef) -> CompileResult<MaxSize>;
}

/// Sizer for contexts where no type may be inspected.
pub(crate) struct NoTypes;

impl TypeSizer for NoTypes {
    fn size_of(&mut self, r: &TypeRef) -> CompileResult<MaxSize> {
        Err(CompileError::InvariantViolation(format!(
            "sizeof({}) outside of a compilation",
            crate::ident::describe(r)
        )))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// OPERATORS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Copy)]
enum OpKind {
    Numeric(fn(&[f64]) -> f64),
    SizeOf,
}

struct Operator {
    arity: usize,
    kind: OpKind,
}

fn operator(name: &str) -> Option<Operator> {
    let (arity, kind) = match name {
        "*" | "asterisk" => (2, OpKind::Numeric(|a| a[0] * a[1])),
        "/" | "slash" => (2, OpKind::Numeric(|a| a[0] / a[1])),
        "+" | "plus" => (2, OpKind::Numeric(|a| a[0] + a[1])),
        "-" | "minus" => (2, OpKind::Numeric(|a| a[0] - a[1])),
        "%" | "percent" => (2, OpKind::Numeric(|a| a[0] % a[1])),
        "floor" => (1, OpKind::Numeric(|a| a[0].floor())),
        // half-way values round up, toward positive infinity
        "round" => (1, OpKind::Numeric(|a| (a[0] + 0.5).floor())),
        "ceil" => (1, OpKind::Numeric(|a| a[0].ceil())),
        "min" => (2, OpKind::Numeric(|a| a[0].min(a[1]))),
        "max" => (2, OpKind::Numeric(|a| a[0].max(a[1]))),
        "sizeof" => (1, OpKind::SizeOf),
        _ => return None,
    };
    Some(Operator { arity, kind })
}

pub fn evaluate(
    expr: &Expr,
    bindings: &Bindings,
    sizer: &mut dyn TypeSizer,
) -> CompileResult<Operand> {
    let mut stack: Vec<Operand> = Vec::new();
    for token in &expr.0 {
        match token {
            Token::Number(n) => stack.push(Operand::number(*n)),
            Token::Str(s) => stack.push(Operand::Const(Constant::Str(s.clone()))),
            Token::Type(r) => stack.push(Operand::Type(substitute(r, bindings))),
            Token::Param(name) => {
                let bound = bindings
                    .get(name)
                    .ok_or_else(|| CompileError::UndefinedType { name: name.clone() })?;
                stack.push(bound.clone());
            }
            Token::Op(name) => {
                let op = operator(name)
                    .ok_or_else(|| CompileError::UnknownOperator { op: name.clone() })?;
                if stack.len() < op.arity {
                    return Err(CompileError::Arity {
                        op: name.clone(),
                        expected: op.arity,
                        found: stack.len(),
                    });
                }
                let args = stack.split_off(stack.len() - op.arity);
                let result = match op.kind {
                    OpKind::Numeric(exec) => {
                        let nums = args
                            .iter()
                            .map(|a| match a {
                                Operand::Const(Constant::Number(n)) => Ok(n.0),
                                _ => Err(CompileError::TypeError {
                                    op: name.clone(),
                                    expected: "numeric value",
                                }),
                            })
                            .collect::<CompileResult<Vec<f64>>>()?;
                        Operand::number(exec(&nums))
                    }
                    OpKind::SizeOf => match &args[0] {
                        Operand::Type(r) => match sizer.size_of(r)? {
                            MaxSize::Bounded(n) => Operand::number(n as f64),
                            MaxSize::Unbounded => {
                                let name = crate::ident::describe(r);
                                return Err(CompileError::UnboundedSizeof { name });
                            }
                        },
                        Operand::Const(_) => {
                            let op = name.clone();
                            return Err(CompileError::TypeError { op, expected: "a type" });
                        }
                    },
                };
                stack.push(result);
            }
        }
    }
    match stack.len() {
        1 => Ok(stack.remove(0)),
        len => Err(CompileError::ResultShape { len }),
    }
}

/// Interpret an evaluated operand as an element count or byte size.
pub fn as_size(operand: &Operand, context: &str) -> CompileResult<usize> {
    match operand {
        Operand::Const(Constant::Number(n))
            if n.0.is_finite() && n.0 >= 0.0 && n.0.fract() == 0.0 && n.0 <= u32::MAX as f64 =>
        {
            Ok(n.0 as usize)
        }
        _ => Err(CompileError::TypeError {
            op: context.to_string(),
            expected: "a non-negative integer",
        }),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SUBSTITUTION
// ————————————————————————————————————————————————————————————————————————————

/// Replace generic parameters bound to types (and inside nested generic
/// arguments, array sizes and inline bodies) with their bound values.
/// Parameters bound to constants stay in place where a type is expected.
pub fn substitute(r: &TypeRef, bindings: &Bindings) -> TypeRef {
    if bindings.is_empty() {
        return r.clone();
    }
    let kind = match &r.kind {
        TypeKind::Param { name } => match bindings.get(name) {
            Some(Operand::Type(bound)) => {
                let mut out = bound.clone();
                out.nullable |= r.nullable;
                return out;
            }
            _ => r.kind.clone(),
        },
        TypeKind::Named { name, generics } => TypeKind::Named {
            name: name.clone(),
            generics: generics
                .as_ref()
                .map(|g| g.iter().map(|e| substitute_expr(e, bindings)).collect()),
        },
        TypeKind::Inline { body } => {
            TypeKind::Inline { body: Box::new(substitute_struct(body, bindings)) }
        }
        TypeKind::Array { element, size } => TypeKind::Array {
            element: Box::new(substitute(element, bindings)),
            size: substitute_expr(size, bindings),
        },
        TypeKind::Path { segments } => {
            let mut segments = segments.clone();
            for seg in &mut segments {
                if let Some(g) = &mut seg.generics {
                    *g = g.iter().map(|e| substitute_expr(e, bindings)).collect();
                }
            }
            TypeKind::Path { segments }
        }
    };
    TypeRef { kind, nullable: r.nullable }
}

fn substitute_expr(expr: &Expr, bindings: &Bindings) -> Expr {
    let tokens = expr
        .0
        .iter()
        .map(|t| match t {
            Token::Param(name) => match bindings.get(name) {
                Some(Operand::Const(Constant::Number(n))) => Token::Number(n.0),
                Some(Operand::Const(Constant::Str(s))) => Token::Str(s.clone()),
                Some(Operand::Type(r)) => Token::Type(r.clone()),
                None => t.clone(),
            },
            Token::Type(r) => Token::Type(substitute(r, bindings)),
            other => other.clone(),
        })
        .collect();
    Expr(tokens)
}

fn substitute_struct(body: &StructDef, bindings: &Bindings) -> StructDef {
    let fields = body
        .fields
        .iter()
        .map(|f| match f {
            FieldDef::Typed { key, ty } => {
                FieldDef::Typed { key: key.clone(), ty: substitute(ty, bindings) }
            }
            FieldDef::Const { ty, value } => {
                FieldDef::Const { ty: substitute(ty, bindings), value: value.clone() }
            }
            literal => literal.clone(),
        })
        .collect();
    StructDef { shape: body.shape, fields, namespace: body.namespace.clone() }
}
