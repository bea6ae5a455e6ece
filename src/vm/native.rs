//! Built-in functions. The compiler resolves names against [`NATIVES`] and
//! stores the index in a function constant; the VM calls through the same table.

use std::io::{BufRead, Write};

use super::object::Object;
use super::{Vm, VmError, VmResult};

pub type NativeFn = fn(&mut Vm<'_>, &[Object]) -> VmResult<Object>;

pub struct Native {
    pub name: &'static str,
    pub arity: u32,
    pub func: NativeFn,
}

pub static NATIVES: &[Native] = &[
    Native { name: "print", arity: 1, func: print },
    Native { name: "input_number", arity: 1, func: input_number },
    Native { name: "input_string", arity: 1, func: input_string },
];

/// Registry index and entry for a built-in name.
pub fn lookup(name: &str) -> Option<(u32, &'static Native)> {
    NATIVES
        .iter()
        .enumerate()
        .find(|(_, native)| native.name == name)
        .map(|(index, native)| (index as u32, native))
}

fn print(vm: &mut Vm<'_>, args: &[Object]) -> VmResult<Object> {
    let mut text = vm.render(&args[0])?;
    text.push(b'\n');
    vm.out.write_all(&text)?;
    Ok(Object::NONE)
}

fn prompt_line(vm: &mut Vm<'_>, prompt: &Object) -> VmResult<String> {
    let text = vm.render(prompt)?;
    vm.out.write_all(&text)?;
    vm.out.flush()?;
    let mut line = String::new();
    vm.input.read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(line)
}

fn input_number(vm: &mut Vm<'_>, args: &[Object]) -> VmResult<Object> {
    let line = prompt_line(vm, &args[0])?;
    match line.trim().parse::<i32>() {
        Ok(n) => Ok(Object::Number(n)),
        Err(_) => Err(VmError::InvalidInput { text: line }),
    }
}

fn input_string(vm: &mut Vm<'_>, args: &[Object]) -> VmResult<Object> {
    let line = prompt_line(vm, &args[0])?;
    vm.alloc_string(line.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let (index, native) = lookup("input_string").unwrap();
        assert_eq!(index, 2);
        assert_eq!(native.arity, 1);
        assert!(lookup("printf").is_none());
    }
}
