//! Per-type handler tables.
//!
//! Every runtime type has five optional handlers: addition, equality, call,
//! field read and field write. A missing handler means the operation is a
//! type error for that kind of value. The VM always selects the handler by
//! the kind of the first operand.

use std::rc::Rc;

use crate::bytecode::Callee;

use super::object::{BoundMethod, FunctionRef, Object, ObjectKind};
use super::{Vm, VmError, VmResult};

pub type AddFn = fn(&mut Vm<'_>, Object, Object) -> VmResult<Object>;
pub type EqFn = fn(&Vm<'_>, &Object, &Object) -> VmResult<bool>;
pub type CallFn = fn(&mut Vm<'_>, Object, u32) -> VmResult<()>;
pub type GetFieldFn = fn(&mut Vm<'_>, Object, Object) -> VmResult<Object>;
pub type SetFieldFn = fn(&mut Vm<'_>, Object, Object, Object) -> VmResult<()>;

impl ObjectKind {
    pub fn addition(self) -> Option<AddFn> {
        match self {
            ObjectKind::Number => Some(add_number),
            ObjectKind::String => Some(add_string),
            ObjectKind::Bool
            | ObjectKind::Function
            | ObjectKind::Method
            | ObjectKind::Instance
            | ObjectKind::Class => None,
        }
    }

    pub fn equality(self) -> Option<EqFn> {
        match self {
            ObjectKind::Number => Some(eq_number),
            ObjectKind::String => Some(eq_string),
            ObjectKind::Bool => Some(eq_bool),
            ObjectKind::Function => Some(eq_function),
            ObjectKind::Instance => Some(eq_instance),
            ObjectKind::Class => Some(eq_class),
            ObjectKind::Method => None,
        }
    }

    pub fn callable(self) -> Option<CallFn> {
        match self {
            ObjectKind::Function => Some(call_function),
            ObjectKind::Method => Some(call_method),
            ObjectKind::Class => Some(call_class),
            ObjectKind::Number | ObjectKind::String | ObjectKind::Bool | ObjectKind::Instance => None,
        }
    }

    pub fn get_field(self) -> Option<GetFieldFn> {
        match self {
            ObjectKind::Instance => Some(get_instance_field),
            _ => None,
        }
    }

    pub fn set_field(self) -> Option<SetFieldFn> {
        match self {
            ObjectKind::Instance => Some(set_instance_field),
            _ => None,
        }
    }
}

// ── Addition ─────────────────────────────────────────────────────────

fn add_number(vm: &mut Vm<'_>, left: Object, right: Object) -> VmResult<Object> {
    match (&left, &right) {
        (Object::Number(a), Object::Number(b)) => Ok(Object::Number(a.wrapping_add(*b))),
        (Object::Number(_), Object::String(_)) => concat(vm, &left, &right),
        _ => Err(VmError::type_error("add", &left, Some(&right))),
    }
}

fn add_string(vm: &mut Vm<'_>, left: Object, right: Object) -> VmResult<Object> {
    match right {
        Object::String(_) | Object::Number(_) => concat(vm, &left, &right),
        _ => Err(VmError::type_error("add", &left, Some(&right))),
    }
}

/// Joins the text of both operands into a new heap string. The bytes are
/// copied out before allocating, since the operands are no longer on the stack.
fn concat(vm: &mut Vm<'_>, left: &Object, right: &Object) -> VmResult<Object> {
    let mut bytes = vm.render(left)?;
    bytes.extend_from_slice(&vm.render(right)?);
    vm.alloc_string(bytes)
}

// ── Equality ─────────────────────────────────────────────────────────

fn eq_number(_: &Vm<'_>, left: &Object, right: &Object) -> VmResult<bool> {
    Ok(matches!((left, right), (Object::Number(a), Object::Number(b)) if a == b))
}

fn eq_string(vm: &Vm<'_>, left: &Object, right: &Object) -> VmResult<bool> {
    match (left, right) {
        (Object::String(a), Object::String(b)) => Ok(vm.string_bytes(a)? == vm.string_bytes(b)?),
        _ => Ok(false),
    }
}

fn eq_bool(_: &Vm<'_>, left: &Object, right: &Object) -> VmResult<bool> {
    Ok(matches!((left, right), (Object::Bool(a), Object::Bool(b)) if a == b))
}

fn eq_function(_: &Vm<'_>, left: &Object, right: &Object) -> VmResult<bool> {
    Ok(matches!((left, right), (Object::Function(a), Object::Function(b)) if a == b))
}

fn eq_instance(_: &Vm<'_>, left: &Object, right: &Object) -> VmResult<bool> {
    Ok(matches!((left, right), (Object::Instance(a), Object::Instance(b)) if a == b))
}

fn eq_class(_: &Vm<'_>, left: &Object, right: &Object) -> VmResult<bool> {
    Ok(matches!((left, right), (Object::Class(a), Object::Class(b)) if a == b))
}

// ── Calls ────────────────────────────────────────────────────────────

fn call_function(vm: &mut Vm<'_>, callee: Object, argc: u32) -> VmResult<()> {
    match callee {
        Object::Function(function) => vm.enter(function, argc),
        other => Err(VmError::type_error("call", &other, None)),
    }
}

fn call_method(vm: &mut Vm<'_>, callee: Object, argc: u32) -> VmResult<()> {
    match callee {
        Object::Method(method) => vm.enter_method(&method, argc),
        other => Err(VmError::type_error("call", &other, None)),
    }
}

fn call_class(vm: &mut Vm<'_>, callee: Object, argc: u32) -> VmResult<()> {
    match callee {
        Object::Class(class) => vm.instantiate(class, argc),
        other => Err(VmError::type_error("call", &other, None)),
    }
}

// ── Fields ───────────────────────────────────────────────────────────

fn field_name(vm: &Vm<'_>, name: &Object) -> VmResult<Vec<u8>> {
    match name {
        Object::String(s) => Ok(vm.string_bytes(s)?.to_vec()),
        other => Err(VmError::type_error("use as a field name", other, None)),
    }
}

fn unknown_field(class: &str, field: &[u8]) -> VmError {
    VmError::UnknownField { class: class.to_string(), field: String::from_utf8_lossy(field).into_owned() }
}

fn get_instance_field(vm: &mut Vm<'_>, target: Object, name: Object) -> VmResult<Object> {
    let Object::Instance(handle) = target else {
        return Err(VmError::type_error("read a field of", &target, None));
    };
    let field = field_name(vm, &name)?;
    let class = match vm.heap.instance(handle) {
        Some((class, _)) => class,
        None => return Err(VmError::BufferOverflow { what: "heap handle", index: handle.index() as i64 }),
    };
    let info = vm.class_info(class)?;

    if let Some(index) = info.member_index(&field) {
        let value = vm
            .heap
            .instance(handle)
            .and_then(|(_, members)| members.get(index).cloned())
            .unwrap_or(Object::NONE);
        return Ok(value);
    }
    match info.method(&field) {
        Some(method) => Ok(Object::Method(Rc::new(BoundMethod {
            function: FunctionRef { callee: Callee::User { entry: method.entry }, arity: method.arity },
            receiver: target,
        }))),
        None => Err(unknown_field(&info.name, &field)),
    }
}

fn set_instance_field(vm: &mut Vm<'_>, target: Object, name: Object, value: Object) -> VmResult<()> {
    let Object::Instance(handle) = target else {
        return Err(VmError::type_error("assign a field of", &target, None));
    };
    let field = field_name(vm, &name)?;
    let class = match vm.heap.instance(handle) {
        Some((class, _)) => class,
        None => return Err(VmError::BufferOverflow { what: "heap handle", index: handle.index() as i64 }),
    };
    let info = vm.class_info(class)?;
    let index = info.member_index(&field).ok_or_else(|| unknown_field(&info.name, &field))?;
    let members = vm
        .heap
        .instance_members_mut(handle)
        .ok_or(VmError::BufferOverflow { what: "heap handle", index: handle.index() as i64 })?;
    match members.get_mut(index) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(VmError::BufferOverflow { what: "member", index: index as i64 }),
    }
}
