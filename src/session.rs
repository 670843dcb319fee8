//! Compilation session.
//!
//! A `Session` owns everything one compilation touches: the type arena, the
//! namespace scopes (root scope 0 holds primitives and top-level definitions,
//! nested scopes hold enum variants and struct-local definitions) and the
//! options. Resolution is pull-based: asking for a name compiles it and
//! everything it references, memoizing each result under its canonical key.
//!
//! Recursive schemas are handled by reserving a type slot and registering a
//! `Locked` entry before a body compiles; anything that reaches the same key
//! again receives the reserved slot id, which is only dereferenced at
//! encode/decode time.

mod array;
mod enums;
mod structs;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::ast::{Definition, Expr, PathSegment, TemplateDef, TypeKind, TypeRef};
use crate::buffer;
use crate::error::{CompileError, CompileResult};
use crate::expr::{self, Bindings, Constant, Operand, TypeSizer};
use crate::ident;
use crate::layout::{CompiledType, Layout, MaxSize, TypeId, TypeTable};
use crate::options::CompileOptions;
use crate::primitives::{self, Builtin, Primitive, TextEncoding};

pub(crate) const ROOT: ScopeId = ScopeId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum Template {
    User(Arc<TemplateDef>),
    Builtin(Builtin),
}

#[derive(Debug, Clone)]
pub(crate) enum Entry {
    Compiled(TypeId),
    /// Generic template, compiled once per distinct argument list.
    Deferred(Template),
    /// Compilation in progress; `scope` is the block's nested namespace.
    Locked { slot: TypeId, scope: Option<ScopeId> },
}

#[derive(Debug, Default)]
pub(crate) struct Scope {
    parent: Option<ScopeId>,
    definitions: IndexMap<String, Arc<Definition>>,
    entries: HashMap<String, Entry>,
    /// Generic bindings in force for definitions declared in this scope.
    bindings: Bindings,
}

enum Resolved {
    Type(TypeId),
    Template(Template),
}

enum Body<'a> {
    Definition(&'a Definition),
    Builtin(Builtin, &'a [Operand]),
}

struct Mark {
    slots: usize,
    scopes: usize,
    journal: usize,
}

#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) table: TypeTable,
    scopes: Vec<Scope>,
    pub(crate) options: CompileOptions,
    /// Entries inserted since the last commit, undone on rollback.
    journal: Vec<(ScopeId, String)>,
    depth: usize,
    empty_tuple: Option<TypeId>,
}

impl Session {
    pub(crate) fn new(options: CompileOptions) -> Self {
        let mut table = TypeTable::default();
        let mut root = Scope::default();
        for (name, primitive) in primitives::registry() {
            let id = table.push(CompiledType {
                ident: name.clone(),
                max_size: primitive.max_size(),
                layout: Layout::Primitive(primitive),
                scope: None,
            });
            root.entries.insert(name, Entry::Compiled(id));
        }
        for builtin in Builtin::ALL {
            let template = Entry::Deferred(Template::Builtin(builtin));
            root.entries.insert(builtin.name().to_string(), template);
        }
        Self {
            table,
            scopes: vec![root],
            options,
            journal: Vec::new(),
            depth: 0,
            empty_tuple: None,
        }
    }

    /// Register a top-level definition; names are unique across the session.
    pub(crate) fn define(&mut self, name: String, def: Definition) -> CompileResult<()> {
        let root = &mut self.scopes[ROOT.0];
        if root.definitions.contains_key(&name) || root.entries.contains_key(&name) {
            return Err(CompileError::DuplicateDefinition { name });
        }
        root.definitions.insert(name, Arc::new(def));
        Ok(())
    }

    pub(crate) fn top_level_names(&self) -> Vec<String> {
        self.scopes[ROOT.0].definitions.keys().cloned().collect()
    }

    /// Compiled id of a root entry, if it has been compiled.
    pub(crate) fn root_entry(&self, name: &str) -> Option<TypeId> {
        match self.scopes[ROOT.0].entries.get(name) {
            Some(Entry::Compiled(id)) => Some(*id),
            _ => None,
        }
    }

    /// Resolve a top-level name; templates are registered but not compiled.
    pub(crate) fn resolve_name(&mut self, name: &str) -> CompileResult<()> {
        self.atomically(|s| s.resolve_block(ROOT, name, None, false).map(|_| ()))
    }

    pub(crate) fn resolve_root_ref(&mut self, r: &TypeRef) -> CompileResult<TypeId> {
        self.atomically(|s| s.resolve_type(ROOT, r, &Bindings::new()))
    }

    // ————————————————————————————————————————————————————————————————————————
    // TRANSACTIONS
    // ————————————————————————————————————————————————————————————————————————

    /// Run `f`, then reject by-value cycles among the slots it created. On
    /// failure every entry, scope and slot `f` created is discarded.
    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        let mark = Mark {
            slots: self.table.len(),
            scopes: self.scopes.len(),
            journal: self.journal.len(),
        };
        let result = f(self).and_then(|v| self.check_containment(mark.slots).map(|()| v));
        match result {
            Ok(v) => {
                self.journal.truncate(mark.journal);
                Ok(v)
            }
            Err(error) => {
                self.rollback(mark);
                Err(error)
            }
        }
    }

    fn rollback(&mut self, mark: Mark) {
        for (scope, key) in self.journal.drain(mark.journal..).rev() {
            if let Some(s) = self.scopes.get_mut(scope.0) {
                s.entries.remove(&key);
            }
        }
        self.scopes.truncate(mark.scopes);
        self.table.truncate(mark.slots);
        self.depth = 0;
        if self.empty_tuple.is_some_and(|id| id.index() >= mark.slots) {
            self.empty_tuple = None;
        }
    }

    fn insert(&mut self, scope: ScopeId, key: String, entry: Entry) {
        self.scopes[scope.0].entries.insert(key.clone(), entry);
        self.journal.push((scope, key));
    }

    /// A value of any type on a cycle of mandatory by-value edges would have
    /// to contain itself; such a type can never be encoded.
    fn check_containment(&self, from: usize) -> CompileResult<()> {
        const NEW: u8 = 0;
        const ACTIVE: u8 = 1;
        const DONE: u8 = 2;
        let len = self.table.len();
        let mut state = vec![NEW; len.saturating_sub(from)];
        let children = |id: TypeId| -> Vec<TypeId> {
            self.table
                .get(id)
                .map(|t| t.layout.mandatory_children())
                .unwrap_or_default()
                .into_iter()
                .filter(|c| c.index() >= from && c.index() < len)
                .collect()
        };
        for start in from..len {
            if state[start - from] != NEW {
                continue;
            }
            state[start - from] = ACTIVE;
            let mut stack = vec![(TypeId(start), children(TypeId(start)))];
            while let Some((id, next)) =
                stack.last_mut().map(|(id, pending)| (*id, pending.pop()))
            {
                match next {
                    Some(child) => match state[child.index() - from] {
                        NEW => {
                            state[child.index() - from] = ACTIVE;
                            stack.push((child, children(child)));
                        }
                        ACTIVE => {
                            let name = self
                                .table
                                .get(child)
                                .map_or_else(|| format!("#{}", child.index()), |t| t.ident.clone());
                            warn!(%name, "rejecting type that contains itself by value");
                            return Err(CompileError::RecursiveType { name });
                        }
                        _ => {}
                    },
                    None => {
                        state[id.index() - from] = DONE;
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }

    // ————————————————————————————————————————————————————————————————————————
    // NAMESPACE
    // ————————————————————————————————————————————————————————————————————————

    /// First scope on the parent chain that knows `name`.
    fn lookup(&self, scope: ScopeId, name: &str, local_only: bool) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if s.entries.contains_key(name) || s.definitions.contains_key(name) {
                return Some(id);
            }
            if local_only {
                return None;
            }
            current = s.parent;
        }
        None
    }

    fn open_scope(
        &mut self,
        parent: ScopeId,
        namespace: &IndexMap<String, Definition>,
        bindings: &Bindings,
    ) -> ScopeId {
        let definitions = namespace
            .iter()
            .map(|(name, def)| (name.clone(), Arc::new(def.clone())))
            .collect();
        self.scopes.push(Scope {
            parent: Some(parent),
            definitions,
            entries: HashMap::new(),
            bindings: bindings.clone(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    /// Nested namespace of a compiled or in-progress block.
    fn nested_scope(&self, mut id: TypeId) -> Option<ScopeId> {
        for _ in 0..=self.table.len() {
            match self.table.get(id) {
                Some(ty) => match (&ty.layout, ty.scope) {
                    (_, Some(scope)) => return Some(scope),
                    (Layout::Alias(target), None) => id = *target,
                    _ => return None,
                },
                None => {
                    let mut entries = self.scopes.iter().flat_map(|s| s.entries.values());
                    return entries.find_map(|e| match e {
                        Entry::Locked { slot, scope } if *slot == id => *scope,
                        _ => None,
                    });
                }
            }
        }
        None
    }

    fn resolve_block(
        &mut self,
        scope: ScopeId,
        name: &str,
        args: Option<Vec<Operand>>,
        local_only: bool,
    ) -> CompileResult<Resolved> {
        let Some(home) = self.lookup(scope, name, local_only) else {
            let name = match &args {
                Some(args) => ident::key(name, args).unwrap_or_else(|| format!("{name}<…>")),
                None => name.to_string(),
            };
            return Err(CompileError::UndefinedType { name });
        };
        let Some(args) = args else {
            if let Some(entry) = self.scopes[home.0].entries.get(name) {
                return Ok(match entry {
                    Entry::Compiled(id) => {
                        trace!(name, "namespace cache hit");
                        Resolved::Type(*id)
                    }
                    Entry::Locked { slot, .. } => {
                        trace!(name, "placeholder hit");
                        Resolved::Type(*slot)
                    }
                    Entry::Deferred(template) => Resolved::Template(template.clone()),
                });
            }
            let def = self.scopes[home.0]
                .definitions
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::UndefinedType { name: name.to_string() })?;
            if let Definition::Template(t) = def.as_ref() {
                let template = Template::User(Arc::new(t.clone()));
                self.insert(home, name.to_string(), Entry::Deferred(template.clone()));
                return Ok(Resolved::Template(template));
            }
            let bindings = self.scopes[home.0].bindings.clone();
            let (key, ident) = (Some(name.to_string()), name.to_string());
            let id = self.compile_block(home, key, ident, Body::Definition(&def), &bindings)?;
            return Ok(Resolved::Type(id));
        };
        let template = match self.resolve_block(home, name, None, true)? {
            Resolved::Template(t) => t,
            Resolved::Type(_) => {
                return Err(CompileError::GenericArity {
                    name: name.to_string(),
                    expected: 0,
                    found: args.len(),
                });
            }
        };
        self.instantiate(home, name, template, args).map(Resolved::Type)
    }

    fn instantiate(
        &mut self,
        home: ScopeId,
        name: &str,
        template: Template,
        args: Vec<Operand>,
    ) -> CompileResult<TypeId> {
        let args = match &template {
            Template::Builtin(builtin) => builtin.fill_defaults(args)?,
            Template::User(t) if t.params.len() != args.len() => {
                return Err(CompileError::GenericArity {
                    name: name.to_string(),
                    expected: t.params.len(),
                    found: args.len(),
                });
            }
            Template::User(_) => args,
        };
        let key = ident::key(name, &args);
        if let Some(key) = &key {
            match self.scopes[home.0].entries.get(key) {
                Some(Entry::Compiled(id)) => {
                    trace!(key, "instantiation cache hit");
                    return Ok(*id);
                }
                Some(Entry::Locked { slot, .. }) => {
                    trace!(key, "placeholder hit");
                    return Ok(*slot);
                }
                Some(Entry::Deferred(_)) => {
                    let reason = format!("{key} is registered as a template");
                    return Err(CompileError::InvariantViolation(reason));
                }
                None => {}
            }
        }
        let shown = key.clone().unwrap_or_else(|| format!("{name}<…>"));
        match template {
            Template::Builtin(builtin) => {
                let body = Body::Builtin(builtin, &args);
                self.compile_block(home, key, shown, body, &Bindings::new())
            }
            Template::User(t) => {
                let mut bindings = self.scopes[home.0].bindings.clone();
                bindings.extend(t.params.iter().cloned().zip(args));
                debug!(template = name, instance = %shown, "instantiating generic template");
                self.compile_block(home, key, shown, Body::Definition(&t.body), &bindings)
            }
        }
    }

    /// Resolve `name` to a concrete type; bare builtin templates take their
    /// default arguments.
    fn resolve_concrete(
        &mut self,
        scope: ScopeId,
        name: &str,
        args: Option<Vec<Operand>>,
        local_only: bool,
    ) -> CompileResult<TypeId> {
        match self.resolve_block(scope, name, args, local_only)? {
            Resolved::Type(id) => Ok(id),
            Resolved::Template(Template::Builtin(_)) => {
                match self.resolve_block(scope, name, Some(Vec::new()), local_only)? {
                    Resolved::Type(id) => Ok(id),
                    Resolved::Template(_) => {
                        let reason = format!("{name} did not instantiate");
                        Err(CompileError::InvariantViolation(reason))
                    }
                }
            }
            Resolved::Template(Template::User(t)) => Err(CompileError::GenericArity {
                name: name.to_string(),
                expected: t.params.len(),
                found: 0,
            }),
        }
    }

    // ————————————————————————————————————————————————————————————————————————
    // BLOCKS
    // ————————————————————————————————————————————————————————————————————————

    fn compile_block(
        &mut self,
        home: ScopeId,
        key: Option<String>,
        ident: String,
        body: Body<'_>,
        bindings: &Bindings,
    ) -> CompileResult<TypeId> {
        if self.depth >= self.options.max_depth {
            return Err(CompileError::RecursionLimit { name: ident, limit: self.options.max_depth });
        }
        let slot = self.table.reserve();
        let nested = match &body {
            Body::Definition(def) => {
                def.local_namespace().map(|ns| self.open_scope(home, ns, bindings))
            }
            Body::Builtin(..) => None,
        };
        if let Some(key) = &key {
            self.insert(home, key.clone(), Entry::Locked { slot, scope: nested });
        }
        self.depth += 1;
        let compiled = match body {
            Body::Definition(def) => {
                self.compile_definition(nested.unwrap_or(home), &ident, def, bindings)
            }
            Body::Builtin(builtin, args) => self.compile_builtin(home, builtin, args),
        };
        self.depth -= 1;
        let (layout, max_size) = compiled?;
        debug!(%ident, slot = slot.index(), %max_size, "compiled type");
        self.table.fill(slot, CompiledType { ident, max_size, layout, scope: nested });
        if let Some(key) = key {
            self.scopes[home.0].entries.insert(key, Entry::Compiled(slot));
        }
        Ok(slot)
    }

    fn compile_definition(
        &mut self,
        scope: ScopeId,
        ident: &str,
        def: &Definition,
        bindings: &Bindings,
    ) -> CompileResult<(Layout, MaxSize)> {
        match def {
            Definition::Struct(s) => self.compile_struct(scope, s, bindings),
            Definition::Enum(e) => self.compile_enum(scope, e, bindings),
            Definition::Alias(alias) => {
                if expr::substitute(&alias.target, bindings).nullable {
                    let reason = format!("alias {ident} should not be nullable");
                    return Err(CompileError::InvariantViolation(reason));
                }
                let target = self.resolve_type(scope, &alias.target, bindings)?;
                Ok((Layout::Alias(target), self.table.max_size(target)))
            }
            Definition::Template(_) => Err(CompileError::InvariantViolation(format!(
                "{ident}: a template body cannot itself be a template"
            ))),
        }
    }

    fn compile_builtin(
        &mut self,
        scope: ScopeId,
        builtin: Builtin,
        args: &[Operand],
    ) -> CompileResult<(Layout, MaxSize)> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| CompileError::GenericArity {
                name: builtin.name().to_string(),
                expected: i + 1,
                found: args.len(),
            })
        };
        match builtin {
            Builtin::String => {
                let Operand::Const(Constant::Str(label)) = arg(0)? else {
                    return Err(CompileError::TypeError {
                        op: builtin.name().into(),
                        expected: "an encoding name",
                    });
                };
                let encoding = TextEncoding::from_label(label)
                    .ok_or_else(|| CompileError::UnsupportedEncoding(label.clone()))?;
                Ok((Layout::Primitive(Primitive::Str(encoding)), MaxSize::Unbounded))
            }
            Builtin::Array => {
                let element = self.type_argument(scope, builtin, arg(0)?)?;
                let max_len = args.get(1).map(|n| expr::as_size(n, "Array length")).transpose()?;
                let max_size = match max_len {
                    Some(n) => {
                        let prefix = MaxSize::Bounded(buffer::uvar_len(n as u64));
                        prefix + self.table.max_size(element).times(n)
                    }
                    None => MaxSize::Unbounded,
                };
                Ok((Layout::List { element, max_len }, max_size))
            }
            Builtin::Padded => {
                let inner = self.type_argument(scope, builtin, arg(0)?)?;
                let size = expr::as_size(arg(1)?, "Padded size")?;
                Ok((Layout::Padded { inner, size }, MaxSize::Bounded(size)))
            }
            Builtin::Bytes => {
                let size = expr::as_size(arg(0)?, "Bytes length")?;
                Ok((Layout::Bytes(size), MaxSize::Bounded(size)))
            }
        }
    }

    fn type_argument(
        &mut self,
        scope: ScopeId,
        builtin: Builtin,
        arg: &Operand,
    ) -> CompileResult<TypeId> {
        match arg {
            Operand::Type(r) => self.resolve_type(scope, r, &Bindings::new()),
            Operand::Const(_) => {
                Err(CompileError::TypeError { op: builtin.name().into(), expected: "a type" })
            }
        }
    }

    /// Shared zero-field tuple, standing in for empty variants of array enums.
    fn empty_tuple(&mut self) -> TypeId {
        if let Some(id) = self.empty_tuple {
            return id;
        }
        let id = self.table.push(CompiledType {
            ident: "()".into(),
            max_size: MaxSize::ZERO,
            layout: Layout::Struct(crate::layout::StructLayout {
                shape: crate::ast::StructShape::ArrayLike,
                bitmap_bytes: 0,
                fields: Vec::new(),
            }),
            scope: None,
        });
        self.empty_tuple = Some(id);
        id
    }

    // ————————————————————————————————————————————————————————————————————————
    // TYPE REFERENCES
    // ————————————————————————————————————————————————————————————————————————

    pub(crate) fn resolve_type(
        &mut self,
        scope: ScopeId,
        r: &TypeRef,
        bindings: &Bindings,
    ) -> CompileResult<TypeId> {
        let r = expr::substitute(r, bindings);
        match &r.kind {
            TypeKind::Param { name } => Err(match bindings.get(name) {
                Some(Operand::Const(_)) => {
                    CompileError::TypeError { op: name.clone(), expected: "a type" }
                }
                _ => CompileError::UndefinedType { name: name.clone() },
            }),
            TypeKind::Inline { body } => {
                let local = if body.namespace.is_empty() {
                    scope
                } else {
                    self.open_scope(scope, &body.namespace, bindings)
                };
                let (layout, max_size) = self.compile_struct(local, body, bindings)?;
                Ok(self.table.push(CompiledType {
                    ident: ident::describe(&r),
                    max_size,
                    layout,
                    scope: (local != scope).then_some(local),
                }))
            }
            TypeKind::Array { element, size } => self.compile_array(scope, element, size, bindings),
            TypeKind::Path { segments } => self.resolve_path(scope, segments, bindings, &r),
            TypeKind::Named { name, generics } => {
                let args = self.evaluate_args(scope, generics.as_deref(), bindings)?;
                self.resolve_concrete(scope, name, args, false)
            }
        }
    }

    fn resolve_path(
        &mut self,
        scope: ScopeId,
        segments: &[PathSegment],
        bindings: &Bindings,
        whole: &TypeRef,
    ) -> CompileResult<TypeId> {
        let Some((last, init)) = segments.split_last() else {
            return Err(CompileError::InvariantViolation("empty type path".into()));
        };
        let mut current = scope;
        let mut local_only = false;
        for segment in init {
            let args = self.evaluate_args(current, segment.generics.as_deref(), bindings)?;
            let id = self.resolve_concrete(current, &segment.name, args, local_only)?;
            current = self
                .nested_scope(id)
                .ok_or_else(|| CompileError::UndefinedType { name: ident::describe(whole) })?;
            local_only = true;
        }
        let args = self.evaluate_args(current, last.generics.as_deref(), bindings)?;
        self.resolve_concrete(current, &last.name, args, local_only)
    }

    fn evaluate_args(
        &mut self,
        scope: ScopeId,
        generics: Option<&[Expr]>,
        bindings: &Bindings,
    ) -> CompileResult<Option<Vec<Operand>>> {
        let Some(exprs) = generics else { return Ok(None) };
        exprs
            .iter()
            .map(|e| self.evaluate(scope, e, bindings))
            .collect::<CompileResult<Vec<_>>>()
            .map(Some)
    }

    fn evaluate(
        &mut self,
        scope: ScopeId,
        e: &Expr,
        bindings: &Bindings,
    ) -> CompileResult<Operand> {
        expr::evaluate(e, bindings, &mut Sizer { session: self, scope })
    }
}

/// Resolves `sizeof` operands against the scope being compiled.
struct Sizer<'s> {
    session: &'s mut Session,
    scope: ScopeId,
}

impl TypeSizer for Sizer<'_> {
    fn size_of(&mut self, r: &TypeRef) -> CompileResult<MaxSize> {
        let id = self.session.resolve_type(self.scope, r, &Bindings::new())?;
        Ok(self.session.table.max_size(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnumDef, EnumShape, FieldDef, StructDef};

    fn ty(text: &str) -> TypeRef {
        TypeRef::parse(text).unwrap()
    }

    fn session_with(defs: Vec<(&str, Definition)>) -> Session {
        let mut s = Session::new(CompileOptions::default());
        for (name, def) in defs {
            s.define(name.to_string(), def).unwrap();
        }
        s
    }

    fn max_of(s: &mut Session, text: &str) -> MaxSize {
        let id = s.resolve_root_ref(&ty(text)).unwrap();
        s.table.max_size(id)
    }

    #[test]
    fn primitives_and_user_definitions_share_the_root() {
        let mut s = Session::new(CompileOptions::default());
        let err = s.define("u8".into(), StructDef::empty().into()).unwrap_err();
        assert_eq!(err, CompileError::DuplicateDefinition { name: "u8".into() });
        s.define("A".into(), StructDef::empty().into()).unwrap();
        let err = s.define("A".into(), StructDef::empty().into()).unwrap_err();
        assert_eq!(err, CompileError::DuplicateDefinition { name: "A".into() });
    }

    #[test]
    fn nullable_aliases_are_rejected() {
        let mut s = session_with(vec![("A", Definition::alias(ty("?u8")))]);
        let err = s.resolve_name("A").unwrap_err();
        assert_eq!(err, CompileError::InvariantViolation("alias A should not be nullable".into()));
    }

    #[test]
    fn generic_instances_are_memoized_per_argument_list() {
        let field = TypeRef::parse_in("[T; S]", &["T", "S"]).unwrap();
        let body = StructDef::object([FieldDef::typed("a", field)]);
        let mut s = session_with(vec![("Data2", Definition::template(["T", "S"], body))]);
        s.resolve_name("Data2").unwrap();
        assert_eq!(s.root_entry("Data2"), None);

        let a = s.resolve_root_ref(&ty("Data2<u8, 3>")).unwrap();
        let b = s.resolve_root_ref(&ty("Data2<u8, 1 + 2>")).unwrap();
        let c = s.resolve_root_ref(&ty("Data2<u16, 3>")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(s.table.get(a).unwrap().ident, "Data2<u8, 3>");
        assert_eq!(s.table.max_size(a), MaxSize::Bounded(3));
        assert_eq!(s.table.max_size(c), MaxSize::Bounded(6));
    }

    #[test]
    fn generic_arguments_flow_through_nested_instantiations() {
        let field = TypeRef::parse_in("[T; N]", &["T", "N"]).unwrap();
        let inner = StructDef::object([FieldDef::typed("v", field)]);
        let outer = StructDef::object([FieldDef::typed(
            "w",
            TypeRef::parse_in("Inner<T, S * 2 + 1>", &["T", "S"]).unwrap(),
        )]);
        let mut s = session_with(vec![
            ("Inner", Definition::template(["T", "N"], inner)),
            ("Outer", Definition::template(["T", "S"], outer)),
        ]);
        assert_eq!(max_of(&mut s, "Outer<u16, 1>"), MaxSize::Bounded(6));
        assert!(s.scopes[ROOT.0].entries.contains_key("Inner<u16, 3>"));
    }

    #[test]
    fn builtin_templates_take_defaults() {
        let mut s = Session::new(CompileOptions::default());
        let bare = s.resolve_root_ref(&ty("String")).unwrap();
        let explicit = s.resolve_root_ref(&ty("String<\"utf-8\">")).unwrap();
        assert_eq!(bare, explicit);
        assert_eq!(max_of(&mut s, "Array<u16, 8>"), MaxSize::Bounded(1 + 16));
        assert_eq!(max_of(&mut s, "Array<u16>"), MaxSize::Unbounded);
        assert_eq!(max_of(&mut s, "Padded<u8, 8>"), MaxSize::Bounded(8));
        let err = s.resolve_root_ref(&ty("String<\"latin1\">")).unwrap_err();
        assert_eq!(err, CompileError::UnsupportedEncoding("latin1".into()));
        let err = s.resolve_root_ref(&ty("Padded<u8>")).unwrap_err();
        assert!(matches!(err, CompileError::GenericArity { .. }));
    }

    #[test]
    fn undefined_names_and_wrong_arity_fail() {
        let mut s = session_with(vec![("T1", Definition::template(["T"], StructDef::empty()))]);
        let err = s.resolve_root_ref(&ty("Missing")).unwrap_err();
        assert_eq!(err, CompileError::UndefinedType { name: "Missing".into() });
        let err = s.resolve_root_ref(&ty("T1")).unwrap_err();
        assert_eq!(err, CompileError::GenericArity { name: "T1".into(), expected: 1, found: 0 });
        let err = s.resolve_root_ref(&ty("T1<u8, u8>")).unwrap_err();
        assert_eq!(err, CompileError::GenericArity { name: "T1".into(), expected: 1, found: 2 });
        let err = s.resolve_root_ref(&ty("u8<u8>")).unwrap_err();
        assert_eq!(err, CompileError::GenericArity { name: "u8".into(), expected: 0, found: 1 });
    }

    #[test]
    fn self_reference_through_nullable_field_is_unbounded() {
        let node = StructDef::object([
            FieldDef::typed("value", ty("u8")),
            FieldDef::typed("next", ty("?Node")),
        ]);
        let mut s = session_with(vec![("Node", node.into())]);
        s.resolve_name("Node").unwrap();
        let id = s.root_entry("Node").unwrap();
        assert_eq!(s.table.max_size(id), MaxSize::Unbounded);
    }

    #[test]
    fn by_value_self_containment_is_rejected_and_rolled_back() {
        let bad = StructDef::object([FieldDef::typed("inner", ty("Bad"))]);
        let mut s = session_with(vec![("Bad", bad.into())]);
        let before = s.table.len();
        let err = s.resolve_name("Bad").unwrap_err();
        assert_eq!(err, CompileError::RecursiveType { name: "Bad".into() });
        assert_eq!(s.table.len(), before);
        assert!(!s.scopes[ROOT.0].entries.contains_key("Bad"));

        let mut s = session_with(vec![("Loop", Definition::alias(ty("Loop")))]);
        assert!(matches!(s.resolve_name("Loop"), Err(CompileError::RecursiveType { .. })));
    }

    #[test]
    fn runaway_generic_recursion_hits_the_depth_limit() {
        let next = TypeRef::parse_in("?Grow<[T; 1]>", &["T"]).unwrap();
        let body = StructDef::object([FieldDef::typed("next", next)]);
        let mut s = session_with(vec![("Grow", Definition::template(["T"], body))]);
        s.options.max_depth = 8;
        let err = s.resolve_root_ref(&ty("Grow<u8>")).unwrap_err();
        assert!(matches!(err, CompileError::RecursionLimit { limit: 8, .. }));
        assert_eq!(s.depth, 0);
        assert!(s.scopes[ROOT.0].entries.keys().all(|k| !k.starts_with("Grow<")));
    }

    #[test]
    fn enum_variants_resolve_through_paths_into_the_enum_itself() {
        let mut e = EnumDef::indexed(EnumShape::Object, [(
            "A",
            Definition::from(StructDef::object([FieldDef::typed("x", ty("u8"))])),
        )]);
        e.entries.push(crate::ast::EnumEntry { tag: 1.into(), variant: "B".into() });
        e.namespace.insert("B".into(), Definition::alias(ty("Data.A")));
        let mut s = session_with(vec![("Data", e.into())]);
        s.resolve_name("Data").unwrap();
        let id = s.root_entry("Data").unwrap();
        assert_eq!(s.table.max_size(id), MaxSize::Bounded(2));
        assert_eq!(max_of(&mut s, "Data.B"), MaxSize::Bounded(1));
        assert!(s.resolve_root_ref(&ty("Data.u8")).is_err());
    }

    #[test]
    fn sizeof_resolves_in_the_current_scope() {
        let body = StructDef::object([FieldDef::typed(
            "a",
            TypeRef::parse_in("[T; floor(S / sizeof(T))]", &["T", "S"]).unwrap(),
        )]);
        let mut s = session_with(vec![("Data2", Definition::template(["T", "S"], body))]);
        assert_eq!(max_of(&mut s, "Data2<u16, 7>"), MaxSize::Bounded(6));
        let err = s.resolve_root_ref(&ty("Data2<String, 7>")).unwrap_err();
        assert_eq!(err, CompileError::UnboundedSizeof { name: "String".into() });
    }
}
