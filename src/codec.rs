//! Layout interpreter: the two fixed functions every compiled type runs
//! through. Type ids are dereferenced on demand, so recursive layouts need
//! no special casing here.

use serde_json::{Map, Value};

use crate::ast::{EnumShape, StructShape};
use crate::buffer::{self, Reader};
use crate::error::{CodecError, CodecResult};
use crate::layout::{
    ArrayLayout, EnumLayout, FieldKind, Layout, Slot, StructLayout, TypeId, TypeTable,
};
use crate::primitives::{self, kind_of};

/// Cap on a decoded `Array<T>` count when `T` can encode to nothing, since
/// the input length then puts no bound on it.
pub(crate) const MAX_ZERO_WIDTH_ITEMS: usize = 1 << 16;

pub(crate) fn encode(
    table: &TypeTable,
    id: TypeId,
    value: &Value,
    out: &mut Vec<u8>,
) -> CodecResult<()> {
    let ty = table.get(id).ok_or(CodecError::Unresolved(id.index()))?;
    match &ty.layout {
        Layout::Primitive(p) => primitives::encode(*p, value, out),
        Layout::Alias(target) => encode(table, *target, value, out),
        Layout::Struct(s) => encode_struct(table, s, value, out),
        Layout::Array(a) => encode_array(table, a, value, out),
        Layout::Enum(e) => encode_enum(table, e, value, out),
        Layout::List { element, max_len } => {
            let items = expect_array(value)?;
            if let Some(max) = *max_len
                && items.len() > max
            {
                return Err(CodecError::LengthMismatch { expected: max, found: items.len() });
            }
            buffer::put_uvar(out, items.len() as u64);
            for (i, item) in items.iter().enumerate() {
                encode(table, *element, item, out).map_err(|e| e.within(i))?;
            }
            Ok(())
        }
        Layout::Padded { inner, size } => {
            let start = out.len();
            encode(table, *inner, value, out)?;
            let used = out.len() - start;
            if used > *size {
                out.truncate(start);
                return Err(CodecError::PaddingOverflow { size: used, limit: *size });
            }
            out.resize(start + size, 0);
            Ok(())
        }
        Layout::Bytes(n) => {
            let items = expect_array(value)?;
            if items.len() != *n {
                return Err(CodecError::LengthMismatch { expected: *n, found: items.len() });
            }
            for (i, item) in items.iter().enumerate() {
                let b = primitives::as_u64(item, "byte").map_err(|e| e.within(i))?;
                let b = u8::try_from(b).map_err(|_| {
                    CodecError::OutOfRange { value: b.to_string(), ty: "byte" }.within(i)
                })?;
                out.push(b);
            }
            Ok(())
        }
    }
}

pub(crate) fn decode(table: &TypeTable, id: TypeId, r: &mut Reader<'_>) -> CodecResult<Value> {
    let ty = table.get(id).ok_or(CodecError::Unresolved(id.index()))?;
    match &ty.layout {
        Layout::Primitive(p) => primitives::decode(*p, r),
        Layout::Alias(target) => decode(table, *target, r),
        Layout::Struct(s) => decode_struct(table, s, r),
        Layout::Array(a) => decode_array(table, a, r),
        Layout::Enum(e) => decode_enum(table, e, r),
        Layout::List { element, max_len } => {
            let offset = r.position();
            let count = r.uvar()?;
            let count = usize::try_from(count)
                .map_err(|_| CodecError::UnexpectedEof { needed: usize::MAX, offset })?;
            if let Some(max) = *max_len
                && count > max
            {
                return Err(CodecError::LengthMismatch { expected: max, found: count });
            }
            match table.min_size(*element) {
                0 if count > MAX_ZERO_WIDTH_ITEMS => {
                    return Err(CodecError::LengthMismatch {
                        expected: MAX_ZERO_WIDTH_ITEMS,
                        found: count,
                    });
                }
                0 => {}
                min => {
                    let needed = count.saturating_mul(min);
                    if needed > r.remaining() {
                        return Err(CodecError::UnexpectedEof { needed, offset: r.position() });
                    }
                }
            }
            let mut items = Vec::with_capacity(count.min(r.remaining()));
            for i in 0..count {
                items.push(decode(table, *element, r).map_err(|e| e.within(i))?);
            }
            Ok(Value::Array(items))
        }
        Layout::Padded { inner, size } => {
            let window = r.take(*size)?;
            decode(table, *inner, &mut Reader::new(window))
        }
        Layout::Bytes(n) => Ok(Value::Array(r.take(*n)?.iter().map(|b| Value::from(*b)).collect())),
    }
}

/// Equality where `2`, `2u64` and `2.0` agree.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(p), Some(q)) = (x.as_i64(), y.as_i64()) {
                return p == q;
            }
            if let (Some(p), Some(q)) = (x.as_u64(), y.as_u64()) {
                return p == q;
            }
            x.as_f64() == y.as_f64()
        }
        _ => a == b,
    }
}

fn expect_array(value: &Value) -> CodecResult<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| CodecError::TypeMismatch { expected: "array", found: kind_of(value) })
}

fn expect_object(value: &Value) -> CodecResult<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CodecError::TypeMismatch { expected: "object", found: kind_of(value) })
}

fn field<'v>(value: &'v Value, slot: &Slot) -> Option<&'v Value> {
    match (slot, value) {
        (Slot::Key(k), Value::Object(map)) => map.get(k),
        (Slot::Index(i), Value::Array(items)) => items.get(*i),
        _ => None,
    }
}

fn is_set(bitmap: &[u8], bit: usize) -> bool {
    bitmap.get(bit / 8).is_some_and(|b| b & (1 << (bit % 8)) != 0)
}

// ————————————————————————————————————————————————————————————————————————————
// STRUCTS
// ————————————————————————————————————————————————————————————————————————————

fn encode_struct(
    table: &TypeTable,
    s: &StructLayout,
    value: &Value,
    out: &mut Vec<u8>,
) -> CodecResult<()> {
    match s.shape {
        StructShape::Object => {
            expect_object(value)?;
        }
        StructShape::ArrayLike => {
            expect_array(value)?;
        }
        StructShape::Empty => return Ok(()),
    }
    if s.bitmap_bytes > 0 {
        let mut bitmap = vec![0u8; s.bitmap_bytes];
        for f in &s.fields {
            if let FieldKind::Value { presence: Some(bit), .. } = f.kind
                && field(value, &f.slot).is_some_and(|v| !v.is_null())
            {
                bitmap[bit / 8] |= 1 << (bit % 8);
            }
        }
        out.extend_from_slice(&bitmap);
    }
    for f in &s.fields {
        match &f.kind {
            FieldKind::Const { ty, value: constant, .. } => {
                encode(table, *ty, constant, out).map_err(|e| e.within(&f.slot))?;
            }
            FieldKind::Literal(_) => {}
            FieldKind::Value { ty, presence } => match field(value, &f.slot) {
                Some(v) if presence.is_none() || !v.is_null() => {
                    encode(table, *ty, v, out).map_err(|e| e.within(&f.slot))?;
                }
                Some(_) => {}
                None if presence.is_some() => {}
                None => return Err(CodecError::MissingField(f.slot.to_string())),
            },
        }
    }
    Ok(())
}

fn decode_struct(table: &TypeTable, s: &StructLayout, r: &mut Reader<'_>) -> CodecResult<Value> {
    let bitmap = r.take(s.bitmap_bytes)?;
    let mut object = Map::new();
    let mut items = Vec::new();
    for f in &s.fields {
        let value = match &f.kind {
            FieldKind::Const { ty, value, verify } => {
                let found = decode(table, *ty, r).map_err(|e| e.within(&f.slot))?;
                if *verify && !values_equal(&found, value) {
                    return Err(CodecError::ConstMismatch { expected: value.clone(), found });
                }
                continue;
            }
            FieldKind::Literal(v) => v.clone(),
            FieldKind::Value { ty, presence } => match presence {
                Some(bit) if !is_set(bitmap, *bit) => Value::Null,
                _ => decode(table, *ty, r).map_err(|e| e.within(&f.slot))?,
            },
        };
        match &f.slot {
            Slot::Key(k) => {
                object.insert(k.clone(), value);
            }
            Slot::Index(_) => items.push(value),
            Slot::Detached => {}
        }
    }
    Ok(match s.shape {
        StructShape::ArrayLike => Value::Array(items),
        StructShape::Object | StructShape::Empty => Value::Object(object),
    })
}

// ————————————————————————————————————————————————————————————————————————————
// FIXED ARRAYS
// ————————————————————————————————————————————————————————————————————————————

fn encode_array(
    table: &TypeTable,
    a: &ArrayLayout,
    value: &Value,
    out: &mut Vec<u8>,
) -> CodecResult<()> {
    let items = expect_array(value)?;
    if items.len() != a.size {
        return Err(CodecError::LengthMismatch { expected: a.size, found: items.len() });
    }
    if a.nullable {
        let mut bitmap = vec![0u8; a.size.div_ceil(8)];
        for (i, item) in items.iter().enumerate() {
            if !item.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        out.extend_from_slice(&bitmap);
    }
    for (i, item) in items.iter().enumerate() {
        if a.nullable && item.is_null() {
            continue;
        }
        let written = match a.numeric {
            Some(p) => primitives::encode(p, item, out),
            None => encode(table, a.element, item, out),
        };
        written.map_err(|e| e.within(i))?;
    }
    Ok(())
}

fn decode_array(table: &TypeTable, a: &ArrayLayout, r: &mut Reader<'_>) -> CodecResult<Value> {
    let bitmap: &[u8] = if a.nullable { r.take(a.size.div_ceil(8))? } else { &[] };
    let present = if a.nullable {
        (0..a.size).filter(|&i| is_set(bitmap, i)).count()
    } else {
        a.size
    };
    let min = a.numeric.map_or_else(|| table.min_size(a.element), |p| p.min_size());
    let needed = present.saturating_mul(min);
    if needed > r.remaining() {
        return Err(CodecError::UnexpectedEof { needed, offset: r.position() });
    }
    let mut items = Vec::with_capacity(if a.nullable { a.size } else { a.size.min(r.remaining()) });
    for i in 0..a.size {
        if a.nullable && !is_set(bitmap, i) {
            items.push(Value::Null);
            continue;
        }
        let item = match a.numeric {
            Some(p) => primitives::decode(p, r),
            None => decode(table, a.element, r),
        };
        items.push(item.map_err(|e| e.within(i))?);
    }
    Ok(Value::Array(items))
}

// ————————————————————————————————————————————————————————————————————————————
// ENUMS
// ————————————————————————————————————————————————————————————————————————————

fn encode_enum(
    table: &TypeTable,
    e: &EnumLayout,
    value: &Value,
    out: &mut Vec<u8>,
) -> CodecResult<()> {
    let discriminant = match e.shape {
        EnumShape::Object => expect_object(value)?
            .get(&e.target)
            .ok_or_else(|| CodecError::MissingField(e.target.clone()))?,
        EnumShape::ArrayLike => expect_array(value)?
            .first()
            .ok_or_else(|| CodecError::MissingField("0".into()))?,
    };
    let variant = e
        .variants
        .iter()
        .find(|v| values_equal(&v.dispatch, discriminant))
        .ok_or_else(|| CodecError::UnknownVariant(discriminant.clone()))?;
    encode(table, e.tag, &variant.tag, out)?;
    let written = match (e.shape, value) {
        (EnumShape::ArrayLike, Value::Array(items)) if !variant.embedded_tag => {
            encode(table, variant.payload, &Value::Array(items[1..].to_vec()), out)
        }
        _ => encode(table, variant.payload, value, out),
    };
    written.map_err(|err| err.within(&variant.name))
}

fn decode_enum(table: &TypeTable, e: &EnumLayout, r: &mut Reader<'_>) -> CodecResult<Value> {
    let tag = decode(table, e.tag, r)?;
    let variant = e
        .variants
        .iter()
        .find(|v| values_equal(&v.tag, &tag))
        .ok_or(CodecError::UnknownVariant(tag))?;
    let payload = decode(table, variant.payload, r).map_err(|err| err.within(&variant.name))?;
    match (e.shape, payload) {
        (EnumShape::Object, Value::Object(fields)) if variant.declares_target => {
            Ok(Value::Object(fields))
        }
        (EnumShape::Object, Value::Object(fields)) => {
            let mut object = Map::with_capacity(fields.len() + 1);
            object.insert(e.target.clone(), variant.dispatch.clone());
            object.extend(fields);
            Ok(Value::Object(object))
        }
        (EnumShape::ArrayLike, Value::Array(items)) if variant.embedded_tag => {
            Ok(Value::Array(items))
        }
        (EnumShape::ArrayLike, Value::Array(mut items)) => {
            items.insert(0, variant.dispatch.clone());
            Ok(Value::Array(items))
        }
        (EnumShape::Object, other) => {
            Err(CodecError::TypeMismatch { expected: "object", found: kind_of(&other) })
        }
        (EnumShape::ArrayLike, other) => {
            Err(CodecError::TypeMismatch { expected: "array", found: kind_of(&other) })
        }
    }
}
