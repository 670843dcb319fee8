//! Schema-driven binary codecs.
//!
//! Definitions (structs, tagged enums, aliases and generic templates) are
//! compiled into a [`Schema`] whose types encode `serde_json::Value`s into
//! compact byte strings and decode them back.
//!
//! ```no_run
//! use schema_codec::ast::{Definition, FieldDef, StructDef, TypeRef};
//!
//! let point = StructDef::object([
//!     FieldDef::typed("x", TypeRef::named("ivar")),
//!     FieldDef::typed("y", TypeRef::named("ivar")),
//! ]);
//! let schema = schema_codec::compile([("Point", Definition::from(point))]).unwrap();
//! let codec = schema.get("Point").unwrap();
//! let bytes = codec.encode(&serde_json::json!({ "x": 3, "y": 19 })).unwrap();
//! assert_eq!(bytes, [0x06, 0x26]);
//! ```

pub mod ast;
pub mod buffer;
pub mod error;
pub mod expr;
pub mod ident;
pub mod layout;
pub mod options;
pub mod path_de;
pub mod primitives;
pub mod cli;

mod codec;
mod schema;
mod session;

pub use error::{CodecError, CompileError, LoadError};
pub use layout::{MaxSize, TypeId};
pub use options::CompileOptions;
pub use schema::{Schema, TypeCodec};
pub use session::ScopeId;

use ast::Definition;

/// Compile definitions with default options.
pub fn compile<I, S>(defs: I) -> error::CompileResult<Schema>
where
    I: IntoIterator<Item = (S, Definition)>,
    S: Into<String>,
{
    compile_with(defs, CompileOptions::default())
}

pub fn compile_with<I, S>(defs: I, options: CompileOptions) -> error::CompileResult<Schema>
where
    I: IntoIterator<Item = (S, Definition)>,
    S: Into<String>,
{
    Schema::compile(defs, options)
}
