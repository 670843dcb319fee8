//! Compiled schema handle and per-type codecs.

use serde_json::Value;

use crate::ast::{Definition, TypeRef};
use crate::buffer::Reader;
use crate::codec;
use crate::error::{CodecError, CodecResult, CompileResult};
use crate::layout::{CompiledType, MaxSize, TypeId, TypeTable};
use crate::options::CompileOptions;
use crate::session::Session;

/// The result of a compilation: every top-level type plus the namespace for
/// on-demand instantiation. Read-only use (`get`, `codec`, encode/decode) is
/// safe from many threads at once.
#[derive(Debug)]
pub struct Schema {
    session: Session,
}

/// Encoder/decoder for one compiled type.
#[derive(Debug, Clone, Copy)]
pub struct TypeCodec<'s> {
    table: &'s TypeTable,
    id: TypeId,
    ty: &'s CompiledType,
}

impl Schema {
    pub(crate) fn compile<I, S>(defs: I, options: CompileOptions) -> CompileResult<Self>
    where
        I: IntoIterator<Item = (S, Definition)>,
        S: Into<String>,
    {
        let mut session = Session::new(options);
        for (name, def) in defs {
            session.define(name.into(), def)?;
        }
        for name in session.top_level_names() {
            session.resolve_name(&name)?;
        }
        Ok(Self { session })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.session.options
    }

    /// A compiled root entry: a top-level definition or a primitive.
    pub fn get(&self, name: &str) -> Option<TypeCodec<'_>> {
        self.session.root_entry(name).and_then(|id| self.codec(id))
    }

    pub fn codec(&self, id: TypeId) -> Option<TypeCodec<'_>> {
        let ty = self.session.table.get(id)?;
        Some(TypeCodec { table: &self.session.table, id, ty })
    }

    /// Top-level, non-generic definitions in declaration order.
    pub fn types(&self) -> impl Iterator<Item = (String, TypeCodec<'_>)> + '_ {
        self.session
            .top_level_names()
            .into_iter()
            .filter_map(move |name| self.get(&name).map(|codec| (name, codec)))
    }

    /// Look up or instantiate a type from identifier text, e.g. `Data2<i8>`,
    /// `Data.A`, `[?u16; 4]`. Nothing is left behind if this fails.
    pub fn resolve(&mut self, text: &str) -> CompileResult<TypeCodec<'_>> {
        let r = TypeRef::parse(text)?;
        let id = self.resolve_ref(&r)?;
        let empty = || format!("{text} resolved to an empty slot");
        self.codec(id).ok_or_else(|| crate::error::CompileError::InvariantViolation(empty()))
    }

    pub fn resolve_ref(&mut self, r: &TypeRef) -> CompileResult<TypeId> {
        self.session.resolve_root_ref(r)
    }
}

impl<'s> TypeCodec<'s> {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn ident(&self) -> &'s str {
        &self.ty.ident
    }

    pub fn max_size(&self) -> MaxSize {
        self.ty.max_size
    }

    pub fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.ty.max_size.bytes().unwrap_or(16).min(4096));
        self.encode_into(value, &mut out)?;
        Ok(out)
    }

    /// Append the encoding to `out`; on failure `out` may hold a partial write.
    pub fn encode_into(&self, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
        codec::encode(self.table, self.id, value, out)
    }

    /// Decode a value that must span all of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<Value> {
        let (value, used) = self.decode_prefix(bytes)?;
        match bytes.len() - used {
            0 => Ok(value),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }

    /// Decode one value from the front of `bytes`, returning it with the
    /// number of bytes consumed.
    pub fn decode_prefix(&self, bytes: &[u8]) -> CodecResult<(Value, usize)> {
        let mut reader = Reader::new(bytes);
        let value = codec::decode(self.table, self.id, &mut reader)?;
        Ok((value, reader.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnumDef, EnumEntry, EnumShape, FieldDef, StructDef};
    use crate::error::CompileError;
    use serde_json::json;

    fn ty(text: &str) -> TypeRef {
        TypeRef::parse(text).unwrap()
    }

    fn params(text: &str, names: &[&str]) -> TypeRef {
        TypeRef::parse_in(text, names).unwrap()
    }

    fn schema(defs: Vec<(&str, Definition)>) -> Schema {
        crate::compile(defs).unwrap()
    }

    fn unit_variants(names: &[&str]) -> Vec<(String, Definition)> {
        names.iter().map(|n| (n.to_string(), Definition::from(StructDef::empty()))).collect()
    }

    fn hex_of(codec: TypeCodec<'_>, value: Value) -> String {
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value, "round trip of {value}");
        if let Some(max) = codec.max_size().bytes() {
            assert!(bytes.len() <= max, "{} exceeds max size {max}", hex::encode(&bytes));
        }
        hex::encode(bytes)
    }

    #[test]
    fn point_of_two_ivars() {
        let s = schema(vec![(
            "Point",
            StructDef::object([FieldDef::typed("x", ty("ivar")), FieldDef::typed("y", ty("ivar"))])
                .into(),
        )]);
        let point = s.get("Point").unwrap();
        assert_eq!(hex_of(point, json!({ "x": 3, "y": 19 })), "0626");
        assert_eq!(point.max_size(), MaxSize::Bounded(18));
    }

    #[test]
    fn tuple_of_floats() {
        let s = schema(vec![(
            "Point",
            StructDef::array([FieldDef::positional(ty("f32")), FieldDef::positional(ty("f32"))])
                .into(),
        )]);
        let point = s.get("Point").unwrap();
        let bytes = point.encode(&json!([3.14, -5.28])).unwrap();
        assert_eq!(hex::encode(&bytes), "4048f5c3c0a8f5c3");
        assert_eq!(point.decode(&bytes).unwrap(), json!([3.14f32 as f64, -5.28f32 as f64]));
    }

    #[test]
    fn ten_nullable_fields_pack_into_two_bitmap_bytes() {
        let fields = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"].map(|n| match n {
            "c" => FieldDef::typed(n, ty("u8")),
            "e" => FieldDef::typed(n, ty("Option<u16>")),
            _ => FieldDef::typed(n, ty("?u8")),
        });
        let s = schema(vec![("Data", StructDef::object(fields).into())]);
        let value = json!({
            "a": 8, "b": null, "c": 15, "d": 53, "e": null,
            "f": null, "g": null, "h": null, "i": 5, "j": 6
        });
        assert_eq!(hex_of(s.get("Data").unwrap(), value), "8501080f350506");
    }

    #[test]
    fn inline_structs_nest_without_names() {
        let user = StructDef::object([
            FieldDef::typed("id", ty("u32")),
            FieldDef::typed("enabled", ty("bool")),
            FieldDef::typed("count", ty("u8")),
        ]);
        let transaction = StructDef::object([
            FieldDef::typed("price", ty("ivar")),
            FieldDef::typed("user", TypeRef::inline(user)),
        ]);
        let s = schema(vec![("Transaction", transaction.into())]);
        let value = json!({ "price": 1500, "user": { "id": 19999, "enabled": true, "count": 13 } });
        assert_eq!(hex_of(s.get("Transaction").unwrap(), value), "8bb800004e1f010d");
    }

    #[test]
    fn empty_struct_and_alias() {
        let s = schema(vec![
            ("Empty", StructDef::object([]).into()),
            ("Data", Definition::alias(ty("u8"))),
        ]);
        assert_eq!(hex_of(s.get("Empty").unwrap(), json!({})), "");
        assert_eq!(hex_of(s.get("Data").unwrap(), json!(3)), "03");
    }

    #[test]
    fn generic_sizes_and_expressions() {
        let s = schema(vec![
            (
                "Data2",
                Definition::template(["T", "S"], StructDef::object([FieldDef::typed(
                    "a",
                    params("[T; S]", &["T", "S"]),
                )])),
            ),
            ("Data", Definition::alias(ty("Data2<u8, 3>"))),
            (
                "Data3",
                Definition::template(["T", "S"], StructDef::object([FieldDef::typed(
                    "a",
                    params("[T; S * 2 + 1]", &["T", "S"]),
                )])),
            ),
            ("Data4", Definition::alias(ty("Data3<u8, 1>"))),
            (
                "Data5",
                Definition::template(["T", "S"], StructDef::object([
                    FieldDef::typed("a", params("[T; floor(S / sizeof(T))]", &["T", "S"])),
                    FieldDef::typed("b", ty("u16")),
                ])),
            ),
            ("Data6", Definition::alias(ty("Data5<u16, 7>"))),
        ]);
        assert_eq!(hex_of(s.get("Data").unwrap(), json!({ "a": [1, 2, 3] })), "010203");
        assert_eq!(hex_of(s.get("Data4").unwrap(), json!({ "a": [1, 2, 3] })), "010203");
        assert_eq!(
            hex_of(s.get("Data6").unwrap(), json!({ "a": [1, 2, 3], "b": 4 })),
            "0001000200030004"
        );
        assert!(s.get("Data2").is_none());
        assert_eq!(s.types().map(|(n, _)| n).collect::<Vec<_>>(), ["Data", "Data4", "Data6"]);
    }

    #[test]
    fn fixed_arrays_require_every_element() {
        let s = schema(vec![("Point", Definition::alias(ty("[f32le; 2]")))]);
        let point = s.get("Point").unwrap();
        assert_eq!(hex::encode(point.encode(&json!([3.14, -5.28])).unwrap()), "c3f54840c3f5a8c0");
        let err = point.encode(&json!([1.0])).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn nullable_array_elements_use_a_bitmap() {
        let s = schema(vec![("Data", Definition::alias(ty("[?u8; 3]")))]);
        assert_eq!(hex_of(s.get("Data").unwrap(), json!([1, null, 3])), "050103");
    }

    #[test]
    fn length_prefixed_arrays() {
        let data = StructDef::object([FieldDef::typed("data", ty("Array<u8, 8>"))]);
        let s = schema(vec![("Data", data.into())]);
        let data = s.get("Data").unwrap();
        assert_eq!(hex_of(data, json!({ "data": [1, 2, 3, 4, 5] })), "050102030405");
        let err = data.encode(&json!({ "data": [0, 0, 0, 0, 0, 0, 0, 0, 0] })).unwrap_err();
        assert!(matches!(err.root_cause(), CodecError::LengthMismatch { expected: 8, found: 9 }));
        assert!(data.decode(&hex::decode("09000000000000000000").unwrap()).is_err());
    }

    #[test]
    fn padded_types_fill_or_fail() {
        let pair =
            StructDef::object([FieldDef::typed("a", ty("u16")), FieldDef::typed("b", ty("u16"))]);
        let s = schema(vec![
            ("Data2", pair.into()),
            ("Data", Definition::alias(ty("Padded<Data2, 8>"))),
            ("Data3", Definition::alias(ty("Padded<Data2, 1>"))),
            ("Anon", Definition::alias(TypeRef::generic("Padded", [
                crate::ast::Expr::ty(TypeRef::inline(StructDef::object([FieldDef::typed(
                    "x",
                    ty("u8"),
                )]))),
                crate::ast::Expr::number(2.0),
            ]))),
        ]);
        assert_eq!(hex_of(s.get("Data").unwrap(), json!({ "a": 3, "b": 5 })), "0003000500000000");
        let err = s.get("Data3").unwrap().encode(&json!({ "a": 0, "b": 0 })).unwrap_err();
        assert!(matches!(err, CodecError::PaddingOverflow { size: 4, limit: 1 }));
        assert_eq!(hex_of(s.get("Anon").unwrap(), json!({ "x": 0x13 })), "1300");
    }

    #[test]
    fn strings_json_and_dates() {
        let s = schema(vec![
            ("Text", StructDef::object([FieldDef::typed("str", ty("String<\"utf-8\">"))]).into()),
            ("Blob", StructDef::object([FieldDef::typed("x", ty("JSON"))]).into()),
            ("When", StructDef::array([FieldDef::positional(ty("Date"))]).into()),
        ]);
        assert_eq!(
            hex_of(s.get("Text").unwrap(), json!({ "str": "밯망hee" })),
            "09ebb0afeba79d686565"
        );
        let blob = s.get("Blob").unwrap();
        let bytes = blob.encode(&json!({ "x": { "hello": "world" } })).unwrap();
        assert_eq!(blob.decode(&bytes).unwrap(), json!({ "x": { "hello": "world" } }));
        assert_eq!(
            hex_of(s.get("When").unwrap(), json!(["1970-01-01T00:01:00.000Z"])),
            "000000000000ea60"
        );
    }

    #[test]
    fn wide_integers_inside_tuples() {
        let s = schema(vec![
            ("U48", StructDef::array([FieldDef::positional(ty("u48"))]).into()),
            ("I64", StructDef::array([FieldDef::positional(ty("i64"))]).into()),
            ("I64le", StructDef::array([FieldDef::positional(ty("i64le"))]).into()),
        ]);
        assert_eq!(hex_of(s.get("U48").unwrap(), json!([0xffffffffu64])), "0000ffffffff");
        assert_eq!(hex_of(s.get("U48").unwrap(), json!([0xf9f9ffffffffu64])), "f9f9ffffffff");
        assert_eq!(hex_of(s.get("I64").unwrap(), json!([-0xf9f9ffffffffi64])), "ffff060600000001");
        assert_eq!(
            hex_of(s.get("I64le").unwrap(), json!([-0x01010101010101i64])),
            "fffefefefefefeff"
        );
    }

    #[test]
    fn unit_enums_dispatch_by_name() {
        let e = EnumDef::indexed(EnumShape::Object, unit_variants(&["a", "b", "c", "d"]));
        let s = schema(vec![("Data", e.into())]);
        let data = s.get("Data").unwrap();
        assert_eq!(hex_of(data, json!({ "type": "c" })), "02");
        assert!(
            matches!(data.encode(&json!({ "type": "haha" })), Err(CodecError::UnknownVariant(_)))
        );
        assert!(matches!(data.decode(&[53]), Err(CodecError::UnknownVariant(_))));
    }

    #[test]
    fn tuple_enums_prepend_the_variant_name() {
        let e = EnumDef::indexed(EnumShape::ArrayLike, [
            ("a", Definition::from(StructDef::array([FieldDef::positional(ty("i8"))]))),
            (
                "b",
                Definition::from(StructDef::array([
                    FieldDef::positional(ty("i8")),
                    FieldDef::positional(ty("i8")),
                ])),
            ),
            ("c", Definition::from(StructDef::empty())),
            ("d", Definition::from(StructDef::empty())),
        ]);
        let s = schema(vec![("Data", e.into())]);
        let data = s.get("Data").unwrap();
        assert_eq!(hex_of(data, json!(["a", 15])), "000f");
        assert_eq!(hex_of(data, json!(["b", 0x23, 0x32])), "012332");
        assert_eq!(hex_of(data, json!(["c"])), "02");
    }

    #[test]
    fn object_enums_with_custom_tags() {
        let a = StructDef::object([FieldDef::typed("a", ty("u8"))]);
        let b = StructDef::object([FieldDef::typed("a", ty("u8")), FieldDef::typed("b", ty("u8"))]);
        let variants = || {
            let mut v = vec![
                ("a".to_string(), Definition::from(a.clone())),
                ("b".to_string(), Definition::from(b.clone())),
            ];
            v.extend(unit_variants(&["c", "d"]));
            v
        };
        let plain = EnumDef::indexed(EnumShape::Object, variants());
        let wide = EnumDef::indexed(EnumShape::Object, variants()).with_tag_type(ty("u32"));
        let renamed = EnumDef::indexed(EnumShape::Object, variants())
            .with_tag_type(ty("u8"))
            .with_target("tt");
        let mut strings =
            EnumDef::indexed(EnumShape::Object, variants()).with_tag_type(ty("String"));
        for (entry, tag) in strings.entries.iter_mut().zip(["haha", "meh", "why", "goof"]) {
            entry.tag = json!(tag);
        }
        let s = schema(vec![
            ("Plain", plain.into()),
            ("Wide", wide.into()),
            ("Renamed", renamed.into()),
            ("Strings", strings.into()),
        ]);

        assert_eq!(hex_of(s.get("Plain").unwrap(), json!({ "type": "a", "a": 0x32 })), "0032");
        assert_eq!(
            hex_of(s.get("Plain").unwrap(), json!({ "type": "b", "a": 0x32, "b": 0x55 })),
            "013255"
        );
        assert_eq!(hex_of(s.get("Wide").unwrap(), json!({ "type": "c" })), "00000002");
        assert_eq!(hex_of(s.get("Renamed").unwrap(), json!({ "tt": "a", "a": 0x32 })), "0032");
        assert_eq!(
            hex_of(s.get("Strings").unwrap(), json!({ "type": "a", "a": 0x32 })),
            "046861686132"
        );
    }

    #[test]
    fn variants_may_label_themselves() {
        let a = StructDef::object([
            FieldDef::literal("type", json!("Hello there")),
            FieldDef::typed("a", ty("u8")),
        ]);
        let mut e = EnumDef::indexed(EnumShape::Object, [("a", Definition::from(a))]);
        e.entries.push(EnumEntry { tag: json!(1), variant: "b".into() });
        e.namespace.insert("b".into(), StructDef::empty().into());
        let s = schema(vec![("Data", e.into())]);
        let data = s.get("Data").unwrap();
        assert_eq!(hex_of(data, json!({ "type": "Hello there", "a": 0x32 })), "0032");
        assert!(data.encode(&json!({ "type": "a", "a": 0x32 })).is_err());
    }

    #[test]
    fn alias_variants_keep_their_own_name() {
        let mut e = EnumDef::indexed(EnumShape::Object, [(
            "A",
            Definition::from(StructDef::object([FieldDef::typed("x", ty("u8"))])),
        )]);
        e.entries.push(EnumEntry { tag: json!(1), variant: "B".into() });
        e.namespace.insert("B".into(), Definition::alias(ty("Data.A")));
        let s = schema(vec![("Data", e.into())]);
        let data = s.get("Data").unwrap();
        assert_eq!(hex_of(data, json!({ "type": "B", "x": 0x32 })), "0132");
        assert_eq!(hex_of(data, json!({ "type": "A", "x": 0x32 })), "0032");
    }

    #[test]
    fn recursive_lists_through_nullable_links() {
        let node = StructDef::object([
            FieldDef::typed("value", ty("u8")),
            FieldDef::typed("next", ty("?Node")),
        ]);
        let s = schema(vec![("Node", node.into())]);
        let list = json!({ "value": 1, "next": { "value": 2, "next": null } });
        assert_eq!(hex_of(s.get("Node").unwrap(), list), "01010002");
    }

    #[test]
    fn resolve_instantiates_from_text() {
        let mut s = schema(vec![
            ("Data", StructDef::object([FieldDef::typed("x", ty("i8"))]).into()),
            (
                "Data2",
                Definition::template(["T"], StructDef::object([FieldDef::typed(
                    "x",
                    TypeRef::param("T"),
                )])),
            ),
        ]);
        assert_eq!(hex_of(s.resolve("Data").unwrap(), json!({ "x": 0x13 })), "13");
        let first = s.resolve("Data2<i8>").unwrap().id();
        assert_eq!(hex_of(s.codec(first).unwrap(), json!({ "x": 0x13 })), "13");
        assert_eq!(s.resolve("Data2<i8>").unwrap().id(), first);

        let before = s.session.table.len();
        assert!(matches!(s.resolve("Data2<Missing>"), Err(CompileError::UndefinedType { .. })));
        assert!(matches!(s.resolve("Data2<"), Err(CompileError::Syntax { .. })));
        assert_eq!(s.session.table.len(), before);
    }

    #[test]
    fn strict_constants_verify_decoded_values() {
        let def = StructDef::array([
            FieldDef::constant(ty("u8"), json!(7)),
            FieldDef::positional(ty("u8")),
        ]);
        let lax = crate::compile(vec![("Data", Definition::from(def.clone()))]).unwrap();
        let options = CompileOptions { strict_constants: true, ..CompileOptions::default() };
        let strict = crate::compile_with(vec![("Data", Definition::from(def))], options).unwrap();

        assert_eq!(hex::encode(lax.get("Data").unwrap().encode(&json!([1])).unwrap()), "0701");
        assert_eq!(lax.get("Data").unwrap().decode(&[9, 1]).unwrap(), json!([1]));
        let err = strict.get("Data").unwrap().decode(&[9, 1]).unwrap_err();
        assert!(matches!(err, CodecError::ConstMismatch { .. }));
    }

    #[test]
    fn decode_rejects_short_and_overlong_input() {
        let s = schema(vec![("Pair", Definition::alias(ty("[u16; 2]")))]);
        let pair = s.get("Pair").unwrap();
        let err = pair.decode(&[0, 1, 0]).unwrap_err();
        assert!(matches!(err.root_cause(), CodecError::UnexpectedEof { .. }));
        assert!(matches!(pair.decode(&[0, 1, 0, 2, 9]), Err(CodecError::TrailingBytes(1))));
        assert_eq!(pair.decode_prefix(&[0, 1, 0, 2, 9]).unwrap(), (json!([1, 2]), 4));
    }

    #[test]
    fn fixed_arrays_longer_than_the_input_fail_before_allocating() {
        let s = schema(vec![("Huge", Definition::alias(ty("[u8; 4000000000]")))]);
        let err = s.get("Huge").unwrap().decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { needed: 4_000_000_000, offset: 0 }));

        let s = schema(vec![("Quads", Definition::alias(ty("[u32; 3]")))]);
        let err = s.get("Quads").unwrap().decode(&[0; 11]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { needed: 12, .. }));
    }

    #[test]
    fn list_counts_are_checked_against_element_sizes() {
        let s = schema(vec![("Words", Definition::alias(ty("Array<u16>")))]);
        let err = s.get("Words").unwrap().decode(&[3, 0, 1, 0, 2]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { needed: 6, offset: 1 }));
    }

    #[test]
    fn zero_width_list_counts_are_capped() {
        let s = schema(vec![
            ("Unit", Definition::from(StructDef::empty())),
            ("Many", Definition::alias(ty("Array<Unit>"))),
        ]);
        let many = s.get("Many").unwrap();
        assert_eq!(many.decode(&[3]).unwrap(), json!([{}, {}, {}]));
        let err = many.decode(&[0xe4, 0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LengthMismatch { expected: codec::MAX_ZERO_WIDTH_ITEMS, found: 67_108_864 }
        ));
    }

    #[test]
    fn failures_carry_the_value_path() {
        let inner = StructDef::object([FieldDef::typed("id", ty("u8"))]);
        let outer = StructDef::object([FieldDef::typed("user", TypeRef::inline(inner))]);
        let s = schema(vec![("Outer", outer.into())]);
        let err = s.get("Outer").unwrap().encode(&json!({ "user": { "id": 300 } })).unwrap_err();
        assert_eq!(err.to_string(), "at /user/id: 300 does not fit in u8");
        let err = s.get("Outer").unwrap().encode(&json!({ "user": {} })).unwrap_err();
        assert_eq!(err.to_string(), "at /user: missing field id");
    }

    #[test]
    fn duplicate_top_level_names_fail() {
        let err = crate::compile(vec![
            ("A", Definition::from(StructDef::empty())),
            ("A", Definition::from(StructDef::empty())),
        ])
        .unwrap_err();
        assert_eq!(err, CompileError::DuplicateDefinition { name: "A".into() });
    }

    #[test]
    fn schema_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Schema>();
    }
}
