//! Schema AST consumed by the compiler.
//!
//! A front-end hands over one `Definition` per top-level name. Everything here
//! is plain data with serde derives, so schemas can also be loaded from JSON
//! (see `path_de`). Expressions are already reduced to postfix token order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Definition {
    Struct(StructDef),
    Enum(EnumDef),
    Alias(AliasDef),
    Template(TemplateDef),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructDef {
    pub shape: StructShape,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
    /// Definitions visible only from this struct's fields.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub namespace: IndexMap<String, Definition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructShape {
    #[default]
    Object,
    #[serde(rename = "array")]
    ArrayLike,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldDef {
    /// Ordinary field, read and written through its type.
    Typed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        ty: TypeRef,
    },
    /// Known value: zero bytes on the wire, assigned on decode.
    Literal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        value: Value,
    },
    /// Fixed value written through `ty`; not tied to any key.
    Const { ty: TypeRef, value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub shape: EnumShape,
    /// Wire type of the discriminant; `CompileOptions::default_tag_type` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_type: Option<TypeRef>,
    /// Object key holding the discriminant (object shape only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub entries: Vec<EnumEntry>,
    /// Variant bodies declared inline.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub namespace: IndexMap<String, Definition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumShape {
    #[default]
    Object,
    #[serde(rename = "array")]
    ArrayLike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumEntry {
    pub tag: Value,      // written with the tag type
    pub variant: String, // name looked up in the enum's namespace first
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasDef {
    pub target: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
    pub params: Vec<String>,
    pub body: Box<Definition>,
}

// ————————————————————————————————————————————————————————————————————————————
// TYPE REFERENCES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    #[serde(flatten)]
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ref", rename_all = "snake_case")]
pub enum TypeKind {
    Named {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generics: Option<Vec<Expr>>,
    },
    Param { name: String },
    Inline { body: Box<StructDef> },
    /// Fixed-length array; `element.nullable` turns on the per-element bitmap.
    Array { element: Box<TypeRef>, size: Expr },
    Path { segments: Vec<PathSegment> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generics: Option<Vec<Expr>>,
}

/// Postfix token sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expr(pub Vec<Token>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    Number(f64),
    Str(String),
    Type(TypeRef),
    Param(String),
    Op(String),
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDERS
// ————————————————————————————————————————————————————————————————————————————

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::from(TypeKind::Named { name: name.into(), generics: None })
    }
    pub fn generic(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Self::from(TypeKind::Named {
            name: name.into(),
            generics: Some(args.into_iter().collect()),
        })
    }
    pub fn param(name: impl Into<String>) -> Self {
        Self::from(TypeKind::Param { name: name.into() })
    }
    pub fn inline(body: StructDef) -> Self {
        Self::from(TypeKind::Inline { body: Box::new(body) })
    }
    pub fn array(element: TypeRef, size: Expr) -> Self {
        Self::from(TypeKind::Array { element: Box::new(element), size })
    }
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(|name| PathSegment { name: name.into(), generics: None })
            .collect();
        Self::from(TypeKind::Path { segments })
    }
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
    /// Parse identifier text such as `Data2<u8, 3>` or `[?u16; 4]`.
    pub fn parse(text: &str) -> Result<Self, crate::error::CompileError> {
        crate::ident::parse_type(text, &[])
    }
    /// Like [`TypeRef::parse`], treating the listed names as generic parameters.
    pub fn parse_in(text: &str, params: &[&str]) -> Result<Self, crate::error::CompileError> {
        crate::ident::parse_type(text, params)
    }
}

impl From<TypeKind> for TypeRef {
    fn from(kind: TypeKind) -> Self {
        Self { kind, nullable: false }
    }
}

impl Expr {
    pub fn number(n: f64) -> Self {
        Self(vec![Token::Number(n)])
    }
    pub fn string(s: impl Into<String>) -> Self {
        Self(vec![Token::Str(s.into())])
    }
    pub fn ty(r: TypeRef) -> Self {
        Self(vec![Token::Type(r)])
    }
    pub fn param(name: impl Into<String>) -> Self {
        Self(vec![Token::Param(name.into())])
    }
    /// Parse infix text (`S * 2 + 1`) into postfix tokens.
    pub fn parse_in(text: &str, params: &[&str]) -> Result<Self, crate::error::CompileError> {
        crate::ident::parse_expr(text, params)
    }
}

impl From<TypeRef> for Expr {
    fn from(r: TypeRef) -> Self {
        Self::ty(r)
    }
}

impl StructDef {
    pub fn object(fields: impl IntoIterator<Item = FieldDef>) -> Self {
        Self { shape: StructShape::Object, fields: fields.into_iter().collect(), ..Self::default() }
    }
    pub fn array(fields: impl IntoIterator<Item = FieldDef>) -> Self {
        Self {
            shape: StructShape::ArrayLike,
            fields: fields.into_iter().collect(),
            ..Self::default()
        }
    }
    pub fn empty() -> Self {
        Self { shape: StructShape::Empty, ..Self::default() }
    }
    pub fn with_local(mut self, name: impl Into<String>, def: impl Into<Definition>) -> Self {
        self.namespace.insert(name.into(), def.into());
        self
    }
}

impl FieldDef {
    pub fn typed(key: impl Into<String>, ty: TypeRef) -> Self {
        Self::Typed { key: Some(key.into()), ty }
    }
    pub fn positional(ty: TypeRef) -> Self {
        Self::Typed { key: None, ty }
    }
    pub fn literal(key: impl Into<String>, value: Value) -> Self {
        Self::Literal { key: Some(key.into()), value }
    }
    pub fn positional_literal(value: Value) -> Self {
        Self::Literal { key: None, value }
    }
    pub fn constant(ty: TypeRef, value: Value) -> Self {
        Self::Const { ty, value }
    }
}

impl EnumDef {
    /// Variants tagged `0, 1, 2…` in declaration order, bodies kept local.
    pub fn indexed<I, S>(shape: EnumShape, variants: I) -> Self
    where
        I: IntoIterator<Item = (S, Definition)>,
        S: Into<String>,
    {
        let mut out = Self {
            shape,
            tag_type: None,
            target: None,
            entries: Vec::new(),
            namespace: IndexMap::new(),
        };
        for (i, (name, def)) in variants.into_iter().enumerate() {
            let name = name.into();
            out.entries.push(EnumEntry { tag: Value::from(i as u64), variant: name.clone() });
            out.namespace.insert(name, def);
        }
        out
    }
    pub fn with_tag_type(mut self, ty: TypeRef) -> Self {
        self.tag_type = Some(ty);
        self
    }
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl Definition {
    pub fn alias(target: TypeRef) -> Self {
        Self::Alias(AliasDef { target })
    }
    pub fn template<I, S>(params: I, body: impl Into<Definition>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Template(TemplateDef {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body.into()),
        })
    }
    /// Local namespace the definition carries, if any.
    pub fn local_namespace(&self) -> Option<&IndexMap<String, Definition>> {
        match self {
            Definition::Enum(e) => Some(&e.namespace),
            Definition::Struct(s) if !s.namespace.is_empty() => Some(&s.namespace),
            _ => None,
        }
    }
}

impl From<StructDef> for Definition {
    fn from(s: StructDef) -> Self {
        Definition::Struct(s)
    }
}

impl From<EnumDef> for Definition {
    fn from(e: EnumDef) -> Self {
        Definition::Enum(e)
    }
}
