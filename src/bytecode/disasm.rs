use std::fmt;

use super::*;

/// Renders the constant pool and instruction stream as text.
///
/// Constants are listed by absolute offset; instructions by address relative
/// to `start_address`, matching the jump operands.
pub fn disassemble(program: &Program) -> Result<String, DecodeError> {
    let constants = program.constants()?;
    Ok(Listing { program, constants }.to_string())
}

struct Listing<'a> {
    program: &'a Program,
    constants: Vec<(u32, Constant)>,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program;
        writeln!(f, "; start_address {}", program.start_address())?;
        writeln!(f, "; constants")?;
        for (offset, constant) in &self.constants {
            writeln!(f, "{offset:>6}  {}", describe_constant(program, constant))?;
        }

        writeln!(f, "; code")?;
        let code = program.code();
        let mut pc = 0usize;
        while pc < code.len() {
            let op = code[pc];
            let Some(name) = op_name(op) else {
                writeln!(f, "{pc:>6}  .byte {op}")?;
                pc += 1;
                continue;
            };
            if !has_operand(op) {
                writeln!(f, "{pc:>6}  {name}")?;
                pc += 1;
                continue;
            }
            let Some(raw) = code.get(pc + 1..pc + 1 + OPERAND_WIDTH) else {
                writeln!(f, "{pc:>6}  {name} <truncated>")?;
                break;
            };
            let operand = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            write!(f, "{pc:>6}  {name:<10} {operand}")?;
            if op == OP_PUSH {
                if let Ok(constant) = program.constant_at(operand as u32) {
                    write!(f, "  ; {}", describe_constant(program, &constant))?;
                }
            }
            writeln!(f)?;
            pc += 1 + OPERAND_WIDTH;
        }
        Ok(())
    }
}

fn describe_constant(program: &Program, constant: &Constant) -> String {
    match constant {
        Constant::Number(n) => format!("number {n}"),
        Constant::String(span) => {
            format!("string {:?}", String::from_utf8_lossy(program.span_bytes(*span)))
        }
        Constant::Function(f) => match f.callee {
            Callee::User { entry } => format!("function {}/{} @{entry}", f.name, f.arity),
            Callee::Native { index } => format!("native {}/{} #{index}", f.name, f.arity),
        },
        Constant::Class(class) => {
            let methods: Vec<String> = class
                .methods
                .iter()
                .map(|m| format!("{}/{}@{}", m.name, m.arity, m.entry))
                .collect();
            format!(
                "class {} [{}] {{{}}}",
                class.name,
                class.members.join(", "),
                methods.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_constants_and_instructions() {
        let mut pool = vec![0; Program::HEADER_LEN];
        let greeting = PoolWriter::new(&mut pool).string(b"hi");
        let mut code = vec![OP_PUSH];
        code.extend_from_slice(&(greeting as i32).to_le_bytes());
        code.push(OP_POP);
        code.push(OP_PUSH_NUM);
        code.extend_from_slice(&(-3i32).to_le_bytes());
        code.push(OP_RET);
        let program = Program::assemble(pool, &code);

        let text = disassemble(&program).unwrap();
        assert_eq!(
            text,
            "; start_address 11\n\
             ; constants\n\
             \x20    4  string \"hi\"\n\
             ; code\n\
             \x20    0  PUSH       4  ; string \"hi\"\n\
             \x20    5  POP\n\
             \x20    6  PUSH_NUM   -3\n\
             \x20   11  RET\n"
        );
    }

    #[test]
    fn unknown_bytes_are_listed_not_rejected() {
        let program = Program::assemble(vec![0; Program::HEADER_LEN], &[200, OP_RET]);
        let text = disassemble(&program).unwrap();
        assert!(text.contains(".byte 200"));
        assert!(text.contains("RET"));
    }

    #[test]
    fn number_constants_and_truncated_operands() {
        let mut pool = vec![0; Program::HEADER_LEN];
        PoolWriter::new(&mut pool).number(42);
        let program = Program::assemble(pool, &[OP_POP, OP_JMP, 1, 0]);
        let text = disassemble(&program).unwrap();
        assert_eq!(
            text,
            "; start_address 12\n\
             ; constants\n\
             \x20    4  number 42\n\
             ; code\n\
             \x20    0  POP\n\
             \x20    1  JMP <truncated>\n"
        );
    }
}
