//! Fixed-length arrays `[T; N]`.

use crate::ast::{Expr, TypeRef};
use crate::error::CompileResult;
use crate::expr::{self, Bindings};
use crate::layout::{ArrayLayout, CompiledType, Layout, MaxSize, TypeId};

use super::{ScopeId, Session};

impl Session {
    pub(super) fn compile_array(
        &mut self,
        scope: ScopeId,
        element: &TypeRef,
        size: &Expr,
        bindings: &Bindings,
    ) -> CompileResult<TypeId> {
        let element_ref = expr::substitute(element, bindings);
        let size = self.evaluate(scope, size, bindings)?;
        let size = expr::as_size(&size, "array size")?;
        let element = self.resolve_type(scope, &element_ref, bindings)?;
        let nullable = element_ref.nullable;
        let numeric = match self.table.peel(element).map(|t| &t.layout) {
            Some(Layout::Primitive(p)) if p.is_numeric() => Some(*p),
            _ => None,
        };
        let mut max_size = self.table.max_size(element).times(size);
        if nullable {
            max_size += MaxSize::Bounded(size.div_ceil(8));
        }
        let element_name = self.table.get(element).map_or("…", |t| t.ident.as_str());
        let ident = format!("[{}{element_name}; {size}]", if nullable { "?" } else { "" });
        Ok(self.table.push(CompiledType {
            ident,
            max_size,
            layout: Layout::Array(ArrayLayout { element, size, nullable, numeric }),
            scope: None,
        }))
    }
}
