//! Primitive registry: the wire types every schema can name without defining.
//!
//! Plain primitives are registered as compiled root entries; `String`, `Array`,
//! `Padded` and `Bytes` are builtin generic templates instantiated on demand.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::buffer::{self, Endian, Reader};
use crate::error::{CodecError, CodecResult, CompileError, CompileResult};
use crate::expr::{Constant, Operand};
use crate::layout::MaxSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Uint { width: usize, endian: Endian },
    Int { width: usize, endian: Endian },
    F32(Endian),
    F64(Endian),
    Bool,
    UVar,
    IVar,
    Str(TextEncoding),
    Json,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
}

impl TextEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "utf-16le" | "utf16le" => Some(TextEncoding::Utf16Le),
            _ => None,
        }
    }
}

const WIDTHS: [(usize, &str); 5] = [(1, "8"), (2, "16"), (4, "32"), (6, "48"), (8, "64")];

/// Every plain primitive under its schema name.
pub(crate) fn registry() -> Vec<(String, Primitive)> {
    let mut out = Vec::new();
    for (width, bits) in WIDTHS {
        for (suffix, endian) in [("", Endian::Big), ("le", Endian::Little)] {
            out.push((format!("u{bits}{suffix}"), Primitive::Uint { width, endian }));
            out.push((format!("i{bits}{suffix}"), Primitive::Int { width, endian }));
        }
    }
    out.push(("f32".into(), Primitive::F32(Endian::Big)));
    out.push(("f32le".into(), Primitive::F32(Endian::Little)));
    out.push(("f64".into(), Primitive::F64(Endian::Big)));
    out.push(("f64le".into(), Primitive::F64(Endian::Little)));
    out.push(("bool".into(), Primitive::Bool));
    out.push(("uvar".into(), Primitive::UVar));
    out.push(("ivar".into(), Primitive::IVar));
    out.push(("JSON".into(), Primitive::Json));
    out.push(("Date".into(), Primitive::Date));
    out
}

impl Primitive {
    pub fn max_size(self) -> MaxSize {
        match self {
            Primitive::Uint { width, .. } | Primitive::Int { width, .. } => MaxSize::Bounded(width),
            Primitive::F32(_) => MaxSize::Bounded(4),
            Primitive::F64(_) | Primitive::Date => MaxSize::Bounded(8),
            Primitive::Bool => MaxSize::Bounded(1),
            Primitive::UVar | Primitive::IVar => MaxSize::Bounded(9),
            Primitive::Str(_) | Primitive::Json => MaxSize::Unbounded,
        }
    }

    /// Fewest bytes any value takes; text and varints carry at least one.
    pub fn min_size(self) -> usize {
        match self {
            Primitive::Uint { width, .. } | Primitive::Int { width, .. } => width,
            Primitive::F32(_) => 4,
            Primitive::F64(_) | Primitive::Date => 8,
            Primitive::Bool
            | Primitive::UVar
            | Primitive::IVar
            | Primitive::Str(_)
            | Primitive::Json => 1,
        }
    }

    /// Fixed-width numbers, eligible for the dense array path.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Primitive::Uint { .. } | Primitive::Int { .. } | Primitive::F32(_) | Primitive::F64(_)
        )
    }

    fn label(self) -> &'static str {
        match self {
            Primitive::Uint { width: 1, .. } => "u8",
            Primitive::Uint { width: 2, .. } => "u16",
            Primitive::Uint { width: 4, .. } => "u32",
            Primitive::Uint { width: 6, .. } => "u48",
            Primitive::Uint { .. } => "u64",
            Primitive::Int { width: 1, .. } => "i8",
            Primitive::Int { width: 2, .. } => "i16",
            Primitive::Int { width: 4, .. } => "i32",
            Primitive::Int { width: 6, .. } => "i48",
            Primitive::Int { .. } => "i64",
            Primitive::F32(_) => "f32",
            Primitive::F64(_) => "f64",
            Primitive::Bool => "bool",
            Primitive::UVar => "uvar",
            Primitive::IVar => "ivar",
            Primitive::Str(_) => "String",
            Primitive::Json => "JSON",
            Primitive::Date => "Date",
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILTIN TEMPLATES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    String,  // String<encoding = "utf-8">
    Array,   // Array<T, N?>
    Padded,  // Padded<T, N>
    Bytes,   // Bytes<N>
}

impl Builtin {
    pub(crate) const ALL: [Builtin; 4] =
        [Builtin::String, Builtin::Array, Builtin::Padded, Builtin::Bytes];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::String => "String",
            Builtin::Array => "Array",
            Builtin::Padded => "Padded",
            Builtin::Bytes => "Bytes",
        }
    }

    /// Validate the argument count, appending defaults for omitted trailing arguments.
    pub(crate) fn fill_defaults(self, mut args: Vec<Operand>) -> CompileResult<Vec<Operand>> {
        let (min, max) = match self {
            Builtin::String => (0, 1),
            Builtin::Array => (1, 2),
            Builtin::Padded => (2, 2),
            Builtin::Bytes => (1, 1),
        };
        if args.len() < min || args.len() > max {
            return Err(CompileError::GenericArity {
                name: self.name().to_string(),
                expected: max,
                found: args.len(),
            });
        }
        if self == Builtin::String && args.is_empty() {
            args.push(Operand::Const(Constant::Str("utf-8".into())));
        }
        Ok(args)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// VALUE CODECS
// ————————————————————————————————————————————————————————————————————————————

pub(crate) fn kind_of(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

fn mismatch(expected: &'static str, found: &Value) -> CodecError {
    CodecError::TypeMismatch { expected, found: kind_of(found) }
}

pub(crate) fn as_u64(value: &Value, ty: &'static str) -> CodecResult<u64> {
    let n = value.as_number().ok_or_else(|| mismatch("number", value))?;
    if let Some(u) = n.as_u64() {
        return Ok(u);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
        _ => Err(CodecError::OutOfRange { value: n.to_string(), ty }),
    }
}

pub(crate) fn as_i64(value: &Value, ty: &'static str) -> CodecResult<i64> {
    let n = value.as_number().ok_or_else(|| mismatch("number", value))?;
    if let Some(i) = n.as_i64() {
        return Ok(i);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Ok(f as i64),
        _ => Err(CodecError::OutOfRange { value: n.to_string(), ty }),
    }
}

fn as_f64(value: &Value) -> CodecResult<f64> {
    value.as_f64().ok_or_else(|| mismatch("number", value))
}

fn put_text(out: &mut Vec<u8>, text: &str, encoding: TextEncoding) {
    let bytes: Vec<u8> = match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
    };
    buffer::put_uvar(out, bytes.len() as u64);
    out.extend_from_slice(&bytes);
}

fn read_text(r: &mut Reader<'_>, encoding: TextEncoding) -> CodecResult<String> {
    let len = r.uvar()?;
    let offset = r.position();
    let len = usize::try_from(len)
        .map_err(|_| CodecError::UnexpectedEof { needed: usize::MAX, offset })?;
    let raw = r.take(len)?;
    match encoding {
        TextEncoding::Utf8 => {
            std::str::from_utf8(raw).map(str::to_string).map_err(|_| CodecError::InvalidUtf8)
        }
        TextEncoding::Utf16Le => {
            if raw.len() % 2 != 0 {
                return Err(CodecError::InvalidUtf8);
            }
            let units: Vec<u16> =
                raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            String::from_utf16(&units).map_err(|_| CodecError::InvalidUtf8)
        }
    }
}

fn date_millis(value: &Value) -> CodecResult<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| CodecError::InvalidDate(format!("{s}: {e}"))),
        Value::Number(_) => as_i64(value, "Date"),
        other => Err(mismatch("RFC 3339 string or milliseconds", other)),
    }
}

pub(crate) fn encode(p: Primitive, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match p {
        Primitive::Uint { width, endian } => {
            let v = as_u64(value, p.label())?;
            if width < 8 && v >> (width * 8) != 0 {
                return Err(CodecError::OutOfRange { value: v.to_string(), ty: p.label() });
            }
            buffer::put_uint(out, v, width, endian);
        }
        Primitive::Int { width, endian } => {
            let v = as_i64(value, p.label())?;
            let bits = width * 8;
            if bits < 64 && (v < -(1i64 << (bits - 1)) || v >= (1i64 << (bits - 1))) {
                return Err(CodecError::OutOfRange { value: v.to_string(), ty: p.label() });
            }
            buffer::put_uint(out, v as u64, width, endian);
        }
        Primitive::F32(endian) => buffer::put_f32(out, as_f64(value)? as f32, endian),
        Primitive::F64(endian) => buffer::put_f64(out, as_f64(value)?, endian),
        Primitive::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch("bool", value))?;
            out.push(u8::from(b));
        }
        Primitive::UVar => buffer::put_uvar(out, as_u64(value, "uvar")?),
        Primitive::IVar => buffer::put_uvar(out, buffer::zigzag(as_i64(value, "ivar")?)),
        Primitive::Str(encoding) => {
            let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
            put_text(out, s, encoding);
        }
        Primitive::Json => put_text(out, &serde_json::to_string(value)?, TextEncoding::Utf8),
        Primitive::Date => buffer::put_uint(out, date_millis(value)? as u64, 8, Endian::Big),
    }
    Ok(())
}

pub(crate) fn decode(p: Primitive, r: &mut Reader<'_>) -> CodecResult<Value> {
    Ok(match p {
        Primitive::Uint { width, endian } => Value::from(r.uint(width, endian)?),
        Primitive::Int { width, endian } => Value::from(r.int(width, endian)?),
        Primitive::F32(endian) => Value::from(f64::from(r.f32(endian)?)),
        Primitive::F64(endian) => Value::from(r.f64(endian)?),
        Primitive::Bool => Value::Bool(r.byte()? != 0),
        Primitive::UVar => Value::from(r.uvar()?),
        Primitive::IVar => Value::from(buffer::unzigzag(r.uvar()?)),
        Primitive::Str(encoding) => Value::String(read_text(r, encoding)?),
        Primitive::Json => serde_json::from_str(&read_text(r, TextEncoding::Utf8)?)?,
        Primitive::Date => {
            let ms = r.int(8, Endian::Big)?;
            let dt = DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| CodecError::InvalidDate(format!("{ms} ms out of range")))?;
            Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
    })
}
