//! Tagged unions.
//!
//! The discriminant is always written first, with the enum's tag type. On
//! encode a variant is selected by its name, or by the literal its body
//! declares at the discriminant position; on decode by the wire tag.

use serde_json::Value;

use crate::ast::{EnumDef, EnumShape, StructShape, TypeRef};
use crate::error::CompileResult;
use crate::expr::Bindings;
use crate::layout::{EnumLayout, FieldKind, Layout, MaxSize, Slot, TypeId, VariantOp};

use super::{ScopeId, Session};

/// What the enum compiler needs to know about a variant body.
struct BodyFacts {
    leading_literal: Option<Value>,
    target_literal: Option<Value>,
    empty: bool,
}

impl Session {
    pub(super) fn compile_enum(
        &mut self,
        scope: ScopeId,
        def: &EnumDef,
        bindings: &Bindings,
    ) -> CompileResult<(Layout, MaxSize)> {
        let tag_ref = def
            .tag_type
            .clone()
            .unwrap_or_else(|| TypeRef::named(self.options.default_tag_type.clone()));
        let tag = self.resolve_type(scope, &tag_ref, bindings)?;
        let target = def.target.clone().unwrap_or_else(|| self.options.default_tag_field.clone());

        let mut variants = Vec::with_capacity(def.entries.len());
        let mut payload_max = MaxSize::ZERO;
        for entry in &def.entries {
            let payload = self.resolve_concrete(scope, &entry.variant, None, false)?;
            let facts = self.body_facts(payload, &target);
            let mut op = VariantOp {
                name: entry.variant.clone(),
                tag: entry.tag.clone(),
                dispatch: Value::String(entry.variant.clone()),
                payload,
                embedded_tag: false,
                declares_target: false,
            };
            match def.shape {
                EnumShape::ArrayLike => {
                    if let Some(literal) = facts.leading_literal {
                        op.dispatch = literal;
                        op.embedded_tag = true;
                    }
                    if facts.empty {
                        op.payload = self.empty_tuple();
                    }
                }
                EnumShape::Object => {
                    if let Some(literal) = facts.target_literal {
                        op.dispatch = literal;
                        op.declares_target = true;
                    }
                }
            }
            payload_max = payload_max.max(self.table.max_size(op.payload));
            variants.push(op);
        }
        let max_size = self.table.max_size(tag) + payload_max;
        Ok((Layout::Enum(EnumLayout { shape: def.shape, tag, target, variants }), max_size))
    }

    fn body_facts(&self, payload: TypeId, target: &str) -> BodyFacts {
        let body = self.table.peel(payload).and_then(|t| match &t.layout {
            Layout::Struct(s) => Some(s),
            _ => None,
        });
        let Some(body) = body else {
            return BodyFacts { leading_literal: None, target_literal: None, empty: false };
        };
        let leading_literal = match body.fields.first().map(|f| &f.kind) {
            Some(FieldKind::Literal(v)) => Some(v.clone()),
            _ => None,
        };
        BodyFacts {
            leading_literal,
            target_literal: body.literal_at(&Slot::Key(target.to_string())).cloned(),
            empty: body.shape == StructShape::Empty,
        }
    }
}
