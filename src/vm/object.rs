use std::fmt;
use std::rc::Rc;

use crate::bytecode::{ByteSpan, Callee};

use super::gc::Handle;

/// Runtime type tag. The discriminants are the type codes shared with the constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Number = 0,
    String = 1,
    Bool = 2,
    Function = 3,
    Method = 4,
    Instance = 5,
    Class = 6,
}

impl ObjectKind {
    pub fn type_code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Number => "number",
            ObjectKind::String => "string",
            ObjectKind::Bool => "bool",
            ObjectKind::Function => "function",
            ObjectKind::Method => "method",
            ObjectKind::Instance => "instance",
            ObjectKind::Class => "class",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// String payload: either a span of the constant pool or a heap-owned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrRef {
    Const(ByteSpan),
    Heap(Handle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRef {
    pub callee: Callee,
    pub arity: u32,
}

/// Class identity is the offset of its descriptor in the constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct BoundMethod {
    pub function: FunctionRef,
    pub receiver: Object,
}

/// A value on the VM stack or inside an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Number(i32),
    String(StrRef),
    Bool(bool),
    Function(FunctionRef),
    Method(Rc<BoundMethod>),
    Instance(Handle),
    Class(ClassRef),
}

impl Object {
    /// Value of members that were never assigned and of built-ins with nothing to return.
    pub const NONE: Object = Object::Number(0);

    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Number(_) => ObjectKind::Number,
            Object::String(_) => ObjectKind::String,
            Object::Bool(_) => ObjectKind::Bool,
            Object::Function(_) => ObjectKind::Function,
            Object::Method(_) => ObjectKind::Method,
            Object::Instance(_) => ObjectKind::Instance,
            Object::Class(_) => ObjectKind::Class,
        }
    }

    pub fn as_number(&self) -> Option<i32> {
        match self {
            Object::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Heap handle this value refers to directly, if any.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Object::String(StrRef::Heap(h)) | Object::Instance(h) => Some(*h),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_type_codes() {
        let method = Object::Method(Rc::new(BoundMethod {
            function: FunctionRef { callee: Callee::User { entry: 0 }, arity: 1 },
            receiver: Object::NONE,
        }));
        let cases = [
            (Object::Number(1), ObjectKind::Number, 0),
            (Object::String(StrRef::Const(ByteSpan { start: 8, len: 2 })), ObjectKind::String, 1),
            (Object::Bool(true), ObjectKind::Bool, 2),
            (method, ObjectKind::Method, 4),
            (Object::Class(ClassRef(4)), ObjectKind::Class, 6),
        ];
        for (object, kind, code) in cases {
            assert_eq!(object.kind(), kind);
            assert_eq!(kind.type_code(), code);
        }
        assert_eq!(ObjectKind::Instance.to_string(), "instance");
    }

    #[test]
    fn only_heap_values_expose_handles() {
        assert_eq!(Object::Number(3).handle(), None);
        assert_eq!(Object::Bool(false).as_bool(), Some(false));
        assert_eq!(Object::NONE.as_number(), Some(0));
    }
}
