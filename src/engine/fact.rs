use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::types::concise_type_name;

/// Runtime type of a fact: a `TypeId` paired with the static type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The type key of `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The unqualified type name, used in diagnostics.
    pub fn short_name(&self) -> &'static str {
        let head = self.name.split('<').next().unwrap_or(self.name);
        head.rsplit("::").next().unwrap_or(head)
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// A declared rule parameter type.
///
/// `Exact` admits exactly one runtime type; `Any` admits every runtime type
/// and is how a rule binds a position without constraining it (the
/// wildcard-parameter rendering of a base-class match).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeMatch {
    /// Admits any runtime fact type at this position
    Any,
    /// Admits exactly this runtime fact type
    Exact(TypeKey),
}

impl TypeMatch {
    /// A parameter matching exactly `T`.
    pub fn of<T: Any>() -> Self {
        TypeMatch::Exact(TypeKey::of::<T>())
    }

    /// Whether a fact of runtime type `key` may bind this parameter.
    pub fn admits(&self, key: TypeKey) -> bool {
        match self {
            TypeMatch::Any => true,
            TypeMatch::Exact(declared) => *declared == key,
        }
    }
}

/// A client-owned fact offered to the engine.
///
/// `Fact` is a cheap-to-clone handle; the engine never clones the underlying
/// value. Identity is the handle's allocation address, so inserting two
/// clones of the same handle is a no-op while two separately constructed
/// facts with equal contents are distinct. Sessions are single-threaded, so
/// the handle is deliberately `!Send`.
#[derive(Clone)]
pub struct Fact {
    cell: Rc<RefCell<dyn Any>>,
    type_key: TypeKey,
}

impl Fact {
    /// Wrap a client value as a fact.
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
            type_key: TypeKey::of::<T>(),
        }
    }

    /// The runtime type of the wrapped value.
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_key == TypeKey::of::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.cell.borrow(), |any| any.downcast_ref::<T>()).ok()
    }

    /// Mutably borrow the wrapped value as a `T`.
    pub fn downcast_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.cell.borrow_mut(), |any| any.downcast_mut::<T>()).ok()
    }

    /// Run `f` against the wrapped value if it is a `T`.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.downcast_ref::<T>().map(|value| f(&*value))
    }

    /// Run `f` against the wrapped value mutably if it is a `T`.
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.downcast_mut::<T>().map(|mut value| f(&mut *value))
    }

    /// Whether two handles refer to the same underlying value.
    pub fn ptr_eq(&self, other: &Fact) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Address-based identity used by the fact space.
    pub(crate) fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.cell) as *const () as usize
    }
}

impl std::fmt::Debug for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fact")
            .field("type", &self.type_key.short_name())
            .field("addr", &format_args!("{:#x}", self.ptr_id()))
            .finish()
    }
}
