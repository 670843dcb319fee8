//! Struct compiler: nullability bitmap layout and ordered field ops.

use crate::ast::{FieldDef, StructDef, StructShape};
use crate::error::{CompileError, CompileResult};
use crate::expr::{self, Bindings};
use crate::layout::{FieldKind, FieldOp, Layout, MaxSize, Slot, StructLayout};

use super::{ScopeId, Session};

impl Session {
    pub(super) fn compile_struct(
        &mut self,
        scope: ScopeId,
        def: &StructDef,
        bindings: &Bindings,
    ) -> CompileResult<(Layout, MaxSize)> {
        if def.shape == StructShape::Empty {
            let layout =
                StructLayout { shape: StructShape::Empty, bitmap_bytes: 0, fields: Vec::new() };
            return Ok((Layout::Struct(layout), MaxSize::ZERO));
        }
        let mut fields = Vec::with_capacity(def.fields.len());
        let mut max_size = MaxSize::ZERO;
        let mut flags = 0usize;
        let mut position = 0usize;
        for field in &def.fields {
            let op = match field {
                FieldDef::Const { ty, value } => {
                    let ty = self.resolve_type(scope, ty, bindings)?;
                    // const bytes are on the wire, so they count toward the bound
                    max_size += self.table.max_size(ty);
                    let verify = self.options.strict_constants;
                    FieldOp {
                        slot: Slot::Detached,
                        kind: FieldKind::Const { ty, value: value.clone(), verify },
                    }
                }
                FieldDef::Literal { key, value } => FieldOp {
                    slot: slot_for(def.shape, key.as_deref(), &mut position)?,
                    kind: FieldKind::Literal(value.clone()),
                },
                FieldDef::Typed { key, ty } => {
                    let slot = slot_for(def.shape, key.as_deref(), &mut position)?;
                    let nullable = expr::substitute(ty, bindings).nullable;
                    let ty = self.resolve_type(scope, ty, bindings)?;
                    max_size += self.table.max_size(ty);
                    let presence = nullable.then(|| {
                        flags += 1;
                        flags - 1
                    });
                    FieldOp { slot, kind: FieldKind::Value { ty, presence } }
                }
            };
            fields.push(op);
        }
        let bitmap_bytes = flags.div_ceil(8);
        max_size += MaxSize::Bounded(bitmap_bytes);
        Ok((Layout::Struct(StructLayout { shape: def.shape, bitmap_bytes, fields }), max_size))
    }
}

fn slot_for(shape: StructShape, key: Option<&str>, position: &mut usize) -> CompileResult<Slot> {
    match shape {
        StructShape::ArrayLike => {
            *position += 1;
            Ok(Slot::Index(*position - 1))
        }
        _ => key.map(|k| Slot::Key(k.to_string())).ok_or_else(|| {
            CompileError::InvariantViolation("object struct field has no key".into())
        }),
    }
}
