//! Compiled type IR.
//!
//! Every compiled type is a `Layout` stored in a slot of the `TypeTable`
//! arena. Layouts refer to other types by `TypeId` only, so a slot can be
//! reserved before its body is compiled and patched afterwards; the
//! interpreter in `codec` dereferences ids lazily.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde_json::Value;

use crate::ast::{EnumShape, StructShape};
use crate::primitives::Primitive;
use crate::session::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) usize);

impl TypeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Upper bound on a type's encoded length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSize {
    Bounded(usize),
    Unbounded,
}

impl MaxSize {
    pub const ZERO: MaxSize = MaxSize::Bounded(0);

    pub fn bytes(self) -> Option<usize> {
        match self {
            MaxSize::Bounded(n) => Some(n),
            MaxSize::Unbounded => None,
        }
    }

    pub fn is_bounded(self) -> bool {
        matches!(self, MaxSize::Bounded(_))
    }

    pub fn times(self, n: usize) -> MaxSize {
        match self {
            MaxSize::Bounded(m) => m.checked_mul(n).map_or(MaxSize::Unbounded, MaxSize::Bounded),
            // zero copies of anything take no room
            MaxSize::Unbounded if n == 0 => MaxSize::ZERO,
            MaxSize::Unbounded => MaxSize::Unbounded,
        }
    }

    pub fn max(self, other: MaxSize) -> MaxSize {
        match (self, other) {
            (MaxSize::Bounded(a), MaxSize::Bounded(b)) => MaxSize::Bounded(a.max(b)),
            _ => MaxSize::Unbounded,
        }
    }
}

impl Add for MaxSize {
    type Output = MaxSize;
    fn add(self, rhs: MaxSize) -> MaxSize {
        match (self, rhs) {
            (MaxSize::Bounded(a), MaxSize::Bounded(b)) => {
                a.checked_add(b).map_or(MaxSize::Unbounded, MaxSize::Bounded)
            }
            _ => MaxSize::Unbounded,
        }
    }
}

impl AddAssign for MaxSize {
    fn add_assign(&mut self, rhs: MaxSize) {
        *self = *self + rhs;
    }
}

impl fmt::Display for MaxSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxSize::Bounded(n) => write!(f, "{n}"),
            MaxSize::Unbounded => write!(f, "unbounded"),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// LAYOUTS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub struct CompiledType {
    pub ident: String,
    pub max_size: MaxSize,
    pub layout: Layout,
    /// Nested namespace (enum variants, struct-local definitions).
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone)]
pub enum Layout {
    Primitive(Primitive),
    Struct(StructLayout),
    Array(ArrayLayout),
    Enum(EnumLayout),
    /// Same wire format as another slot.
    Alias(TypeId),
    /// `Array<T, N?>`: uvar count, then elements.
    List { element: TypeId, max_len: Option<usize> },
    Padded { inner: TypeId, size: usize },
    Bytes(usize),
}

#[derive(Debug, Clone)]
pub struct StructLayout {
    pub shape: StructShape,
    pub bitmap_bytes: usize,
    pub fields: Vec<FieldOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Key(String),
    Index(usize),
    /// Const pseudo-field, bound to nothing in the value.
    Detached,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Key(k) => write!(f, "{k}"),
            Slot::Index(i) => write!(f, "{i}"),
            Slot::Detached => write!(f, "const"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldOp {
    pub slot: Slot,
    pub kind: FieldKind,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Const { ty: TypeId, value: Value, verify: bool },
    Literal(Value),
    Value { ty: TypeId, presence: Option<usize> }, // presence = bitmap bit
}

#[derive(Debug, Clone)]
pub struct ArrayLayout {
    pub element: TypeId,
    pub size: usize,
    pub nullable: bool,
    /// Set when the element is a fixed-width number; encoded without dispatch.
    pub numeric: Option<Primitive>,
}

#[derive(Debug, Clone)]
pub struct EnumLayout {
    pub shape: EnumShape,
    pub tag: TypeId,
    pub target: String,
    pub variants: Vec<VariantOp>,
}

#[derive(Debug, Clone)]
pub struct VariantOp {
    pub name: String,
    pub tag: Value,      // wire value
    pub dispatch: Value, // runtime discriminant selecting this variant
    pub payload: TypeId,
    /// Array shape: the payload's first element is the literal discriminant.
    pub embedded_tag: bool,
    /// Object shape: the payload already carries the discriminant key.
    pub declares_target: bool,
}

impl StructLayout {
    pub fn literal_at(&self, slot: &Slot) -> Option<&Value> {
        self.fields.iter().find_map(|f| match &f.kind {
            FieldKind::Literal(v) if &f.slot == slot => Some(v),
            _ => None,
        })
    }

    pub fn declares(&self, slot: &Slot) -> bool {
        self.fields.iter().any(|f| &f.slot == slot)
    }
}

impl Layout {
    /// Types every value of this layout must contain.
    pub(crate) fn mandatory_children(&self) -> Vec<TypeId> {
        match self {
            Layout::Struct(s) => s
                .fields
                .iter()
                .filter_map(|f| match f.kind {
                    FieldKind::Const { ty, .. } => Some(ty),
                    FieldKind::Value { ty, presence: None } => Some(ty),
                    _ => None,
                })
                .collect(),
            Layout::Array(a) if a.size > 0 && !a.nullable => vec![a.element],
            Layout::Alias(target) => vec![*target],
            Layout::Padded { inner, .. } => vec![*inner],
            _ => Vec::new(),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ARENA
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Default)]
pub struct TypeTable {
    slots: Vec<Option<CompiledType>>,
}

impl TypeTable {
    pub(crate) fn reserve(&mut self) -> TypeId {
        self.slots.push(None);
        TypeId(self.slots.len() - 1)
    }

    pub(crate) fn fill(&mut self, id: TypeId, ty: CompiledType) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = Some(ty);
        }
    }

    pub(crate) fn push(&mut self, ty: CompiledType) -> TypeId {
        self.slots.push(Some(ty));
        TypeId(self.slots.len() - 1)
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: TypeId) -> Option<&CompiledType> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn is_reserved(&self, id: TypeId) -> bool {
        matches!(self.slots.get(id.0), Some(None))
    }

    /// A reserved slot is still compiling; anything reaching it is recursive.
    pub fn max_size(&self, id: TypeId) -> MaxSize {
        self.get(id).map_or(MaxSize::Unbounded, |t| t.max_size)
    }

    /// Lower bound on a type's encoded length, checked by the decoder
    /// against the remaining input before it allocates. Types still on the
    /// walk (recursion through enums or lists) count as zero.
    pub fn min_size(&self, id: TypeId) -> usize {
        let mut visiting = vec![None; self.slots.len()];
        self.min_size_in(id, &mut visiting)
    }

    // `None` unseen, `Some(None)` on the walk, `Some(Some(n))` done.
    fn min_size_in(&self, id: TypeId, visiting: &mut [Option<Option<usize>>]) -> usize {
        let Some(ty) = self.get(id) else { return 0 };
        match visiting[id.0] {
            Some(done) => return done.unwrap_or(0),
            None => visiting[id.0] = Some(None),
        }
        let size = match &ty.layout {
            Layout::Primitive(p) => p.min_size(),
            Layout::Struct(s) => s.fields.iter().fold(s.bitmap_bytes, |acc, f| match f.kind {
                FieldKind::Const { ty, .. } | FieldKind::Value { ty, presence: None } => {
                    acc.saturating_add(self.min_size_in(ty, visiting))
                }
                _ => acc,
            }),
            Layout::Array(a) if a.nullable => a.size.div_ceil(8),
            Layout::Array(a) => self.min_size_in(a.element, visiting).saturating_mul(a.size),
            Layout::Enum(e) => {
                let payload =
                    e.variants.iter().map(|v| self.min_size_in(v.payload, visiting)).min();
                self.min_size_in(e.tag, visiting).saturating_add(payload.unwrap_or(0))
            }
            Layout::Alias(target) => self.min_size_in(*target, visiting),
            Layout::List { .. } => 1,
            Layout::Padded { size, .. } => *size,
            Layout::Bytes(n) => *n,
        };
        visiting[id.0] = Some(Some(size));
        size
    }

    /// Follow aliases to the type that actually carries the layout.
    pub fn peel(&self, mut id: TypeId) -> Option<&CompiledType> {
        for _ in 0..=self.slots.len() {
            let ty = self.get(id)?;
            match ty.layout {
                Layout::Alias(target) => id = target,
                _ => return Some(ty),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Endian;

    #[test]
    fn unbounded_absorbs_sums_and_maxima() {
        assert_eq!(MaxSize::Bounded(2) + MaxSize::Bounded(3), MaxSize::Bounded(5));
        assert_eq!(MaxSize::Bounded(2) + MaxSize::Unbounded, MaxSize::Unbounded);
        assert_eq!(MaxSize::Bounded(2).max(MaxSize::Unbounded), MaxSize::Unbounded);
        assert_eq!(MaxSize::Unbounded.times(0), MaxSize::ZERO);
        assert_eq!(MaxSize::Bounded(usize::MAX).times(2), MaxSize::Unbounded);
    }

    #[test]
    fn reserved_slots_count_as_unbounded_until_filled() {
        let mut table = TypeTable::default();
        let id = table.reserve();
        assert!(table.is_reserved(id));
        assert_eq!(table.max_size(id), MaxSize::Unbounded);
        table.fill(id, CompiledType {
            ident: "Unit".into(),
            max_size: MaxSize::ZERO,
            layout: Layout::Bytes(0),
            scope: None,
        });
        assert_eq!(table.max_size(id), MaxSize::ZERO);
    }

    #[test]
    fn peel_follows_alias_chains_and_stops_on_cycles() {
        let mut table = TypeTable::default();
        let base = table.push(CompiledType {
            ident: "B".into(),
            max_size: MaxSize::Bounded(1),
            layout: Layout::Bytes(1),
            scope: None,
        });
        let alias = table.push(CompiledType {
            ident: "A".into(),
            max_size: MaxSize::Bounded(1),
            layout: Layout::Alias(base),
            scope: None,
        });
        assert_eq!(table.peel(alias).map(|t| t.ident.as_str()), Some("B"));

        let a = table.reserve();
        let b = table.push(CompiledType {
            ident: "b".into(),
            max_size: MaxSize::Unbounded,
            layout: Layout::Alias(a),
            scope: None,
        });
        table.fill(a, CompiledType {
            ident: "a".into(),
            max_size: MaxSize::Unbounded,
            layout: Layout::Alias(b),
            scope: None,
        });
        assert!(table.peel(a).is_none());
    }

    #[test]
    fn min_size_counts_mandatory_bytes_and_cuts_cycles() {
        let mut table = TypeTable::default();
        let byte = table.push(CompiledType {
            ident: "u8".into(),
            max_size: MaxSize::Bounded(1),
            layout: Layout::Primitive(Primitive::Uint { width: 1, endian: Endian::Big }),
            scope: None,
        });
        let quad = table.push(CompiledType {
            ident: "[u8; 4]".into(),
            max_size: MaxSize::Bounded(4),
            layout: Layout::Array(ArrayLayout {
                element: byte,
                size: 4,
                nullable: false,
                numeric: None,
            }),
            scope: None,
        });
        assert_eq!(table.min_size(quad), 4);

        let sparse = table.push(CompiledType {
            ident: "[?u8; 12]".into(),
            max_size: MaxSize::Bounded(14),
            layout: Layout::Array(ArrayLayout {
                element: byte,
                size: 12,
                nullable: true,
                numeric: None,
            }),
            scope: None,
        });
        assert_eq!(table.min_size(sparse), 2);

        let a = table.reserve();
        let b = table.push(CompiledType {
            ident: "b".into(),
            max_size: MaxSize::Unbounded,
            layout: Layout::Alias(a),
            scope: None,
        });
        table.fill(a, CompiledType {
            ident: "a".into(),
            max_size: MaxSize::Unbounded,
            layout: Layout::Alias(b),
            scope: None,
        });
        assert_eq!(table.min_size(a), 0);
    }
}
