//! Program artifact layout, opcode table and constant-pool encoding.
//!
//! A program is one byte buffer:
//!
//! ```text
//! [start_address: u32 LE][constant pool ...][instructions ...]
//!  0                      4                  start_address
//! ```
//!
//! Every operand and every integer in the pool is a 4-byte little-endian `i32`.
//! Constant offsets are absolute positions in the buffer; jump targets, call
//! entries and return addresses are relative to `start_address`.

pub mod disasm;

// ── Opcodes ──────────────────────────────────────────────────────────

pub(crate) const OP_PUSH: u8 = 0; // push constant at pool offset
pub(crate) const OP_PUSH_NUM: u8 = 1; // push inline integer
pub(crate) const OP_PUSH_TRUE: u8 = 2;
pub(crate) const OP_PUSH_FALSE: u8 = 3;
pub(crate) const OP_POP: u8 = 4;
pub(crate) const OP_ADD: u8 = 5;
pub(crate) const OP_MIN: u8 = 6;
pub(crate) const OP_MUL: u8 = 7;
pub(crate) const OP_DIV: u8 = 8;
pub(crate) const OP_NOT: u8 = 9;
pub(crate) const OP_DEQ: u8 = 10;
pub(crate) const OP_NEQ: u8 = 11;
pub(crate) const OP_GRE: u8 = 12;
pub(crate) const OP_GRQ: u8 = 13;
pub(crate) const OP_LES: u8 = 14;
pub(crate) const OP_LEQ: u8 = 15;
pub(crate) const OP_AND: u8 = 16;
pub(crate) const OP_OR: u8 = 17;
pub(crate) const OP_DUP: u8 = 18; // push copy of absolute slot
pub(crate) const OP_DUP_LOC: u8 = 19; // push copy of stack_base + offset
pub(crate) const OP_CHANGE: u8 = 20; // pop into absolute slot
pub(crate) const OP_CHANGE_LOC: u8 = 21; // pop into stack_base + offset
pub(crate) const OP_JMP_NOT: u8 = 22;
pub(crate) const OP_JMP: u8 = 23;
pub(crate) const OP_PUSH_BASE: u8 = 24;
pub(crate) const OP_PUSH_ADDR: u8 = 25;
pub(crate) const OP_CALL: u8 = 26;
pub(crate) const OP_RET: u8 = 27;
pub(crate) const OP_GET_FIELD: u8 = 28;
pub(crate) const OP_SET_FIELD: u8 = 29;

pub(crate) const OPERAND_WIDTH: usize = 4;

/// Mnemonic for an opcode byte, `None` if the byte is not an opcode.
pub fn op_name(op: u8) -> Option<&'static str> {
    let name = match op {
        OP_PUSH => "PUSH",
        OP_PUSH_NUM => "PUSH_NUM",
        OP_PUSH_TRUE => "PUSH_TRUE",
        OP_PUSH_FALSE => "PUSH_FALSE",
        OP_POP => "POP",
        OP_ADD => "ADD",
        OP_MIN => "MIN",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_NOT => "NOT",
        OP_DEQ => "DEQ",
        OP_NEQ => "NEQ",
        OP_GRE => "GRE",
        OP_GRQ => "GRQ",
        OP_LES => "LES",
        OP_LEQ => "LEQ",
        OP_AND => "AND",
        OP_OR => "OR",
        OP_DUP => "DUP",
        OP_DUP_LOC => "DUP_LOC",
        OP_CHANGE => "CHANGE",
        OP_CHANGE_LOC => "CHANGE_LOC",
        OP_JMP_NOT => "JMP_NOT",
        OP_JMP => "JMP",
        OP_PUSH_BASE => "PUSH_BASE",
        OP_PUSH_ADDR => "PUSH_ADDR",
        OP_CALL => "CALL",
        OP_RET => "RET",
        OP_GET_FIELD => "GET_FIELD",
        OP_SET_FIELD => "SET_FIELD",
        _ => return None,
    };
    Some(name)
}

/// Whether the opcode is followed by a 4-byte operand.
pub fn has_operand(op: u8) -> bool {
    matches!(
        op,
        OP_PUSH
            | OP_PUSH_NUM
            | OP_DUP
            | OP_DUP_LOC
            | OP_CHANGE
            | OP_CHANGE_LOC
            | OP_JMP_NOT
            | OP_JMP
            | OP_PUSH_ADDR
            | OP_CALL
    )
}

// ── Constant pool ────────────────────────────────────────────────────

/// Pool entry tags. The values match the runtime type codes.
pub(crate) const TAG_NUMBER: i32 = 0;
pub(crate) const TAG_STRING: i32 = 1;
pub(crate) const TAG_FUNCTION: i32 = 3;
pub(crate) const TAG_CLASS: i32 = 6;

pub(crate) const FUNCTION_USER: i32 = 0;
pub(crate) const FUNCTION_NATIVE: i32 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("program is shorter than its 4-byte header")]
    MissingHeader,
    #[error("start address {start} lies outside the {len}-byte program")]
    BadStartAddress { start: u32, len: usize },
    #[error("constant at offset {offset} runs past the end of the pool")]
    Truncated { offset: u32 },
    #[error("unknown constant tag {tag} at offset {offset}")]
    UnknownTag { offset: u32, tag: i32 },
    #[error("malformed {what} in constant at offset {offset}")]
    Malformed { offset: u32, what: &'static str },
}

/// Byte range of a string constant's payload, excluding the NUL terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u32,
    pub len: u32,
}

/// Where a call lands: a code address or an index into the built-in registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    User { entry: u32 },
    Native { index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionConst {
    pub callee: Callee,
    pub arity: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub entry: u32,
    /// Includes the receiver.
    pub arity: u32,
}

/// Decoded class descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub members: Vec<String>,
    pub methods: Vec<MethodInfo>,
}

impl ClassInfo {
    pub fn member_index(&self, name: &[u8]) -> Option<usize> {
        self.members.iter().position(|m| m.as_bytes() == name)
    }

    pub fn method(&self, name: &[u8]) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name.as_bytes() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Number(i32),
    String(ByteSpan),
    Function(FunctionConst),
    Class(ClassInfo),
}

/// Appends constants to a pool buffer. Offsets returned are buffer positions.
pub(crate) struct PoolWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> PoolWriter<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        PoolWriter { buf }
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn cstr(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
    }

    #[cfg(test)]
    pub(crate) fn number(&mut self, value: i32) -> u32 {
        let offset = self.buf.len() as u32;
        self.i32(TAG_NUMBER);
        self.i32(value);
        offset
    }

    pub(crate) fn string(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.buf.len() as u32;
        self.i32(TAG_STRING);
        self.cstr(bytes);
        offset
    }

    pub(crate) fn function(&mut self, callee: Callee, arity: u32, name: &str) -> u32 {
        let offset = self.buf.len() as u32;
        self.i32(TAG_FUNCTION);
        match callee {
            Callee::User { entry } => {
                self.i32(FUNCTION_USER);
                self.i32(entry as i32);
            }
            Callee::Native { index } => {
                self.i32(FUNCTION_NATIVE);
                self.i32(index as i32);
            }
        }
        self.i32(arity as i32);
        self.cstr(name.as_bytes());
        offset
    }

    /// Writes a class descriptor whose method entries are still unknown.
    /// Returns the constant offset and the buffer position of each method's entry field.
    pub(crate) fn class(&mut self, name: &str, members: &[String], methods: &[(String, u32)]) -> (u32, Vec<usize>) {
        let offset = self.buf.len() as u32;
        self.i32(TAG_CLASS);
        self.cstr(name.as_bytes());
        self.i32(members.len() as i32);
        for member in members {
            self.cstr(member.as_bytes());
        }
        self.i32(methods.len() as i32);
        let mut entry_fields = Vec::with_capacity(methods.len());
        for (method, arity) in methods {
            entry_fields.push(self.buf.len());
            self.i32(0);
            self.i32(*arity as i32);
            self.cstr(method.as_bytes());
        }
        (offset, entry_fields)
    }
}

/// Cursor over the pool used by the decoder.
struct PoolReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    origin: u32,
}

impl<'a> PoolReader<'a> {
    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated { offset: self.origin }
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let end = self.pos + 4;
        let raw = self.bytes.get(self.pos..end).ok_or_else(|| self.truncated())?;
        self.pos = end;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn count(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let value = self.i32()?;
        u32::try_from(value).map_err(|_| DecodeError::Malformed { offset: self.origin, what })
    }

    fn cstr_span(&mut self) -> Result<ByteSpan, DecodeError> {
        let rest = self.bytes.get(self.pos..).ok_or_else(|| self.truncated())?;
        let len = rest.iter().position(|&b| b == 0).ok_or_else(|| self.truncated())?;
        let span = ByteSpan { start: self.pos as u32, len: len as u32 };
        self.pos += len + 1;
        Ok(span)
    }

    fn cstr(&mut self) -> Result<String, DecodeError> {
        let span = self.cstr_span()?;
        let start = span.start as usize;
        Ok(String::from_utf8_lossy(&self.bytes[start..start + span.len as usize]).into_owned())
    }
}

// ── Program ──────────────────────────────────────────────────────────

/// A compiled program: header, constant pool and instruction stream in one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<u8>,
    start_address: u32,
}

impl Program {
    pub(crate) const HEADER_LEN: usize = 4;

    /// Joins a pool buffer (which begins with the reserved header bytes) and code.
    pub(crate) fn assemble(mut pool: Vec<u8>, code: &[u8]) -> Program {
        let start_address = pool.len() as u32;
        pool[..Self::HEADER_LEN].copy_from_slice(&start_address.to_le_bytes());
        pool.extend_from_slice(code);
        Program { bytes: pool, start_address }
    }

    /// Reads a program from raw bytes, taking `start_address` from the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Program, DecodeError> {
        let header = bytes.get(..Self::HEADER_LEN).ok_or(DecodeError::MissingHeader)?;
        let start_address = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if (start_address as usize) < Self::HEADER_LEN || start_address as usize > bytes.len() {
            return Err(DecodeError::BadStartAddress { start: start_address, len: bytes.len() });
        }
        Ok(Program { bytes, start_address })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= Self::HEADER_LEN
    }

    /// Instruction stream, starting at `start_address`.
    pub fn code(&self) -> &[u8] {
        &self.bytes[self.start_address as usize..]
    }

    /// Bytes of a string constant or heap-independent span.
    pub fn span_bytes(&self, span: ByteSpan) -> &[u8] {
        let start = span.start as usize;
        self.bytes.get(start..start + span.len as usize).unwrap_or(&[])
    }

    /// Decodes the constant at an absolute offset.
    pub fn constant_at(&self, offset: u32) -> Result<Constant, DecodeError> {
        self.decode_constant(offset).map(|(constant, _)| constant)
    }

    /// Decodes every constant in pool order together with its offset.
    pub fn constants(&self) -> Result<Vec<(u32, Constant)>, DecodeError> {
        let mut offset = Self::HEADER_LEN as u32;
        let mut out = Vec::new();
        while offset < self.start_address {
            let (constant, next) = self.decode_constant(offset)?;
            out.push((offset, constant));
            offset = next;
        }
        Ok(out)
    }

    fn decode_constant(&self, offset: u32) -> Result<(Constant, u32), DecodeError> {
        // Constants never live in the header or the instruction stream.
        let pool = &self.bytes[..self.start_address as usize];
        if (offset as usize) < Self::HEADER_LEN {
            return Err(DecodeError::Truncated { offset });
        }
        let mut reader = PoolReader { bytes: pool, pos: offset as usize, origin: offset };
        let tag = reader.i32()?;
        let constant = match tag {
            TAG_NUMBER => Constant::Number(reader.i32()?),
            TAG_STRING => Constant::String(reader.cstr_span()?),
            TAG_FUNCTION => {
                let kind = reader.i32()?;
                let index = reader.count("function index")?;
                let callee = match kind {
                    FUNCTION_USER => Callee::User { entry: index },
                    FUNCTION_NATIVE => Callee::Native { index },
                    _ => return Err(DecodeError::Malformed { offset, what: "function kind" }),
                };
                let arity = reader.count("function arity")?;
                let name = reader.cstr()?;
                Constant::Function(FunctionConst { callee, arity, name })
            }
            TAG_CLASS => {
                let name = reader.cstr()?;
                let n_members = reader.count("member count")?;
                let mut members = Vec::new();
                for _ in 0..n_members {
                    members.push(reader.cstr()?);
                }
                let n_methods = reader.count("method count")?;
                let mut methods = Vec::new();
                for _ in 0..n_methods {
                    let entry = reader.count("method entry")?;
                    let arity = reader.count("method arity")?;
                    let name = reader.cstr()?;
                    methods.push(MethodInfo { name, entry, arity });
                }
                Constant::Class(ClassInfo { name, members, methods })
            }
            tag => return Err(DecodeError::UnknownTag { offset, tag }),
        };
        Ok((constant, reader.pos as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_with(build: impl FnOnce(&mut PoolWriter) -> Vec<u32>, code: &[u8]) -> (Program, Vec<u32>) {
        let mut pool = vec![0; Program::HEADER_LEN];
        let offsets = build(&mut PoolWriter::new(&mut pool));
        (Program::assemble(pool, code), offsets)
    }

    #[test]
    fn header_holds_start_address() {
        let (program, _) = program_with(|w| vec![w.number(7)], &[OP_RET]);
        assert_eq!(program.start_address(), 12);
        assert_eq!(&program.bytes()[..4], &12u32.to_le_bytes());
        assert_eq!(program.code(), &[OP_RET]);

        let reread = Program::from_bytes(program.bytes().to_vec()).unwrap();
        assert_eq!(reread, program);
    }

    #[test]
    fn string_constant_span_excludes_terminator() {
        let (program, offsets) = program_with(|w| vec![w.string(b"hello")], &[]);
        let Constant::String(span) = program.constant_at(offsets[0]).unwrap() else {
            panic!("expected string constant");
        };
        assert_eq!(span.len, 5);
        assert_eq!(program.span_bytes(span), b"hello");
    }

    #[test]
    fn function_constants_decode() {
        let (program, offsets) = program_with(
            |w| {
                vec![
                    w.function(Callee::User { entry: 17 }, 2, "add"),
                    w.function(Callee::Native { index: 1 }, 1, "input_number"),
                ]
            },
            &[],
        );
        assert_eq!(
            program.constant_at(offsets[0]).unwrap(),
            Constant::Function(FunctionConst {
                callee: Callee::User { entry: 17 },
                arity: 2,
                name: "add".into()
            })
        );
        assert_eq!(
            program.constant_at(offsets[1]).unwrap(),
            Constant::Function(FunctionConst {
                callee: Callee::Native { index: 1 },
                arity: 1,
                name: "input_number".into()
            })
        );
    }

    #[test]
    fn class_descriptor_with_patched_entries() {
        let mut pool = vec![0; Program::HEADER_LEN];
        let (offset, entries) = PoolWriter::new(&mut pool).class(
            "Point",
            &["x".into(), "y".into()],
            &[("sum".into(), 1), ("scale".into(), 2)],
        );
        pool[entries[1]..entries[1] + 4].copy_from_slice(&40i32.to_le_bytes());
        let program = Program::assemble(pool, &[]);

        let Constant::Class(info) = program.constant_at(offset).unwrap() else {
            panic!("expected class constant");
        };
        assert_eq!(info.name, "Point");
        assert_eq!(info.members, ["x", "y"]);
        assert_eq!(info.member_index(b"y"), Some(1));
        assert_eq!(info.method(b"scale").map(|m| (m.entry, m.arity)), Some((40, 2)));
        assert_eq!(info.method(b"sum").map(|m| m.entry), Some(0));
    }

    #[test]
    fn constants_walks_the_whole_pool() {
        let (program, offsets) = program_with(|w| vec![w.number(1), w.string(b"ab"), w.number(-5)], &[OP_POP]);
        let listed: Vec<u32> = program.constants().unwrap().into_iter().map(|(o, _)| o).collect();
        assert_eq!(listed, offsets);
    }

    #[test]
    fn decode_errors() {
        assert_eq!(Program::from_bytes(vec![1, 0]), Err(DecodeError::MissingHeader));
        assert_eq!(
            Program::from_bytes(vec![99, 0, 0, 0]),
            Err(DecodeError::BadStartAddress { start: 99, len: 4 })
        );

        let mut bytes = 12u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&42i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        let program = Program::from_bytes(bytes).unwrap();
        assert_eq!(program.constant_at(4), Err(DecodeError::UnknownTag { offset: 4, tag: 42 }));
        assert_eq!(program.constant_at(10), Err(DecodeError::Truncated { offset: 10 }));
    }

    #[test]
    fn every_opcode_has_a_name() {
        for op in OP_PUSH..=OP_SET_FIELD {
            assert!(op_name(op).is_some(), "opcode {op} unnamed");
        }
        assert_eq!(op_name(OP_SET_FIELD + 1), None);
        assert!(has_operand(OP_CALL));
        assert!(!has_operand(OP_RET));
    }
}
