//! x86-64 instruction encoding.
//!
//! Converts [`Instruction`] records into machine code bytes: legacy
//! prefixes, REX, opcode, ModR/M, displacement and immediate, following the
//! Intel SDM. Symbol references register relocations through the
//! [`RelocSink`]; intra-text jump targets resolve through the sink's
//! displacement query. Encoding is a pure function of its input: identical
//! instructions yield identical bytes and relocation entries.
//!
//! Unsupported opcode/operand combinations are programmer invariants and
//! panic.

use super::instr::{Address, Cond, ImmValue, Immediate, Instruction, Mem, Opcode, Operands, Reg};
use crate::symtab::SymbolId;

/// Relocation kinds the encoder can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// R_X86_64_PC32
    Pc32,
    /// R_X86_64_32S
    Abs32S,
    /// R_X86_64_64
    Abs64,
}

/// Relocation registration and text-displacement queries, implemented by
/// the ELF writer.
///
/// Offsets are relative to the start of the instruction currently being
/// encoded; the sink translates them to section offsets. `text_displacement`
/// returns the signed distance from the field to the symbol's text address,
/// or zero with a pending patch recorded when the symbol is forward.
pub trait RelocSink {
    fn add_reloc_text(&mut self, sym: SymbolId, kind: RelocKind, instr_offset: usize, addend: i64);
    fn text_displacement(&mut self, sym: SymbolId, instr_offset: usize) -> i32;
}

/// Encoded machine code for one instruction, at most 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    pub val: [u8; 16],
    pub len: usize,
}

impl Code {
    fn new() -> Self {
        Code {
            val: [0; 16],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.val[self.len] = byte;
        self.len += 1;
    }

    fn push16(&mut self, value: i16) {
        self.val[self.len..self.len + 2].copy_from_slice(&value.to_le_bytes());
        self.len += 2;
    }

    fn push32(&mut self, value: i32) {
        self.val[self.len..self.len + 4].copy_from_slice(&value.to_le_bytes());
        self.len += 4;
    }

    fn push64(&mut self, value: i64) {
        self.val[self.len..self.len + 8].copy_from_slice(&value.to_le_bytes());
        self.len += 8;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.val[..self.len]
    }
}

const REX: u8 = 0x40;

fn in_byte_range(value: i64) -> bool {
    (-128..=127).contains(&value)
}

fn in_32bit_range(value: i64) -> bool {
    (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&value)
}

fn is_byte_imm(imm: &Immediate) -> bool {
    matches!(imm.as_int(), Some(v) if in_byte_range(v))
}

fn is_32bit_imm(imm: &Immediate) -> bool {
    matches!(imm.as_int(), Some(v) if imm.w < 8 || in_32bit_range(v))
}

/// Operand-size bit of the opcode: 0 for 8-bit forms, 1 otherwise.
fn w_bit(w: u8) -> u8 {
    (w != 1) as u8
}

/// REX byte [0100 WRXB]. Emitted when any bit is set, or when an 8-bit
/// operand forces the uniform byte registers (SPL/BPL/SIL/DIL).
fn push_rex(c: &mut Code, w: bool, r: bool, x: bool, b: bool, force: bool) {
    let byte = REX | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | (b as u8);
    if byte != REX || force {
        c.push(byte);
    }
}

fn rex_for_rm(c: &mut Code, reg: Reg, rm: Reg) {
    push_rex(
        c,
        reg.is_64(),
        reg.r.is_extended(),
        false,
        rm.r.is_extended(),
        reg.needs_rex_for_byte() || rm.needs_rex_for_byte(),
    );
}

fn rex_for_mem(c: &mut Code, reg: Reg, mem: &Mem) {
    let base_ext = mem.addr.base.map(|b| b.is_extended()).unwrap_or(false);
    push_rex(
        c,
        reg.is_64(),
        reg.r.is_extended(),
        false,
        base_ext,
        reg.needs_rex_for_byte(),
    );
}

/// Encode a memory operand as ModR/M plus displacement (Tables 2-2, 2-3).
/// Symbol references use RIP-relative addressing with a PC32 relocation in
/// the four-byte displacement slot.
fn encode_addr(c: &mut Code, sink: &mut dyn RelocSink, reg: u8, addr: &Address) {
    if let Some(sym) = addr.sym {
        // 2.2.1.6 RIP-relative addressing: mod=00, rm=101.
        c.push((reg & 7) << 3 | 0x5);
        // The displacement field ends four bytes before the next
        // instruction in every form emitted here.
        sink.add_reloc_text(sym, RelocKind::Pc32, c.len, i64::from(addr.disp) - 4);
        c.push32(0);
        return;
    }
    let base = addr.base.expect("memory operand without base or symbol");
    debug_assert!(base.low3() != 4, "rsp-based addressing needs SIB");
    let modrm = (reg & 7) << 3 | base.low3();
    // rbp/r13 as base cannot use the mod=00 form.
    let force_disp8 = base.low3() == 5;
    if addr.disp == 0 && !force_disp8 {
        c.push(modrm);
    } else if in_byte_range(i64::from(addr.disp)) {
        c.push(modrm | 0x40);
        c.push(addr.disp as u8);
    } else {
        c.push(modrm | 0x80);
        c.push32(addr.disp);
    }
}

fn modrm_regs(reg: Reg, rm: Reg) -> u8 {
    0xC0 | reg.r.low3() << 3 | rm.r.low3()
}

fn mov(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    match operands {
        Operands::ImmReg(imm, reg) => {
            match reg.w {
                1 => {
                    push_rex(
                        &mut c,
                        false,
                        false,
                        false,
                        reg.r.is_extended(),
                        reg.needs_rex_for_byte(),
                    );
                    c.push(0xB0 | reg.r.low3());
                    c.push(imm.as_int().expect("8-bit immediate") as u8);
                }
                2 => {
                    c.push(0x66);
                    push_rex(&mut c, false, false, false, reg.r.is_extended(), false);
                    c.push(0xB8 | reg.r.low3());
                    c.push16(imm.as_int().expect("16-bit immediate") as i16);
                }
                4 => {
                    push_rex(&mut c, false, false, false, reg.r.is_extended(), false);
                    c.push(0xB8 | reg.r.low3());
                    c.push32(imm.as_int().expect("32-bit immediate") as i32);
                }
                8 => {
                    push_rex(&mut c, true, false, false, reg.r.is_extended(), false);
                    match imm.value {
                        ImmValue::Int(value) if in_32bit_range(value) => {
                            // MOV r64, imm32 sign-extended: C7 /0.
                            c.push(0xC7);
                            c.push(0xC0 | reg.r.low3());
                            c.push32(value as i32);
                        }
                        ImmValue::Int(value) => {
                            c.push(0xB8 | reg.r.low3());
                            c.push64(value);
                        }
                        ImmValue::Addr(sym, disp) => {
                            // Immediate address: absolute sign-extended
                            // 32-bit relocation in the immediate slot.
                            c.push(0xC7);
                            c.push(0xC0 | reg.r.low3());
                            sink.add_reloc_text(sym, RelocKind::Abs32S, c.len, i64::from(disp));
                            c.push32(0);
                        }
                    }
                }
                _ => panic!("invalid mov operand width"),
            }
            c
        }
        Operands::RegReg(src, dst) => {
            assert!(src.w == dst.w, "mov operand widths differ");
            if src.is_16() {
                c.push(0x66);
            }
            rex_for_rm(&mut c, *src, *dst);
            c.push(0x88 + w_bit(src.w));
            c.push(modrm_regs(*src, *dst));
            c
        }
        Operands::RegMem(src, mem) => {
            if src.is_16() {
                c.push(0x66);
            }
            rex_for_mem(&mut c, *src, mem);
            c.push(0x88 + w_bit(src.w));
            encode_addr(&mut c, sink, src.r.low3(), &mem.addr);
            c
        }
        Operands::MemReg(mem, dst) => {
            if dst.is_16() {
                c.push(0x66);
            }
            rex_for_mem(&mut c, *dst, mem);
            c.push(0x8A + w_bit(dst.w));
            encode_addr(&mut c, sink, dst.r.low3(), &mem.addr);
            c
        }
        _ => panic!("unsupported mov operands"),
    }
}

fn movsx(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    let (mem, dst) = match operands {
        Operands::MemReg(mem, dst) => (mem, dst),
        _ => panic!("movsx requires mem, reg operands"),
    };
    rex_for_mem(&mut c, *dst, mem);
    if mem.w == 4 && dst.is_64() {
        // MOVSXD r64, r/m32.
        c.push(0x63);
    } else {
        c.push(0x0F);
        c.push(0xBE | w_bit(mem.w));
    }
    encode_addr(&mut c, sink, dst.r.low3(), &mem.addr);
    c
}

fn movzx(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    match operands {
        Operands::RegReg(src, dst) => {
            rex_for_rm(&mut c, *dst, *src);
            c.push(0x0F);
            c.push(0xB6 | w_bit(src.w));
            c.push(modrm_regs(*dst, *src));
        }
        Operands::MemReg(mem, dst) => {
            rex_for_mem(&mut c, *dst, mem);
            c.push(0x0F);
            c.push(0xB6 | w_bit(mem.w));
            encode_addr(&mut c, sink, dst.r.low3(), &mem.addr);
        }
        _ => panic!("unsupported movzx operands"),
    }
    c
}

fn movaps(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    let (src, mem) = match operands {
        Operands::RegMem(src, mem) => (src, mem),
        _ => panic!("movaps requires xmm, mem operands"),
    };
    assert!(src.r.is_xmm(), "movaps source must be an xmm register");
    c.push(0x0F);
    c.push(0x29);
    encode_addr(&mut c, sink, src.r.low3(), &mem.addr);
    c
}

fn push(operands: &Operands) -> Code {
    let mut c = Code::new();
    let reg = match operands {
        Operands::Reg(reg) => reg,
        _ => panic!("push requires a register operand"),
    };
    push_rex(&mut c, false, false, false, reg.r.is_extended(), false);
    c.push(0x50 | reg.r.low3());
    c
}

/// Group-1 immediate forms: 0x83 /ext ib when the immediate fits a signed
/// byte, else 0x81 /ext id (0x80 for 8-bit operands).
fn alu_imm(sink: &mut dyn RelocSink, ext: u8, operands: &Operands) -> Code {
    let mut c = Code::new();
    match operands {
        Operands::ImmReg(imm, reg) => {
            if reg.is_16() {
                c.push(0x66);
            }
            push_rex(
                &mut c,
                reg.is_64(),
                false,
                false,
                reg.r.is_extended(),
                reg.needs_rex_for_byte(),
            );
            if reg.w == 1 {
                c.push(0x80);
                c.push(0xC0 | ext << 3 | reg.r.low3());
                c.push(imm.as_int().expect("integer immediate") as u8);
            } else if is_byte_imm(imm) {
                c.push(0x83);
                c.push(0xC0 | ext << 3 | reg.r.low3());
                c.push(imm.as_int().unwrap() as u8);
            } else {
                assert!(is_32bit_imm(imm), "immediate out of range");
                c.push(0x81);
                c.push(0xC0 | ext << 3 | reg.r.low3());
                c.push32(imm.as_int().unwrap() as i32);
            }
        }
        Operands::ImmMem(imm, mem) => {
            if mem.w == 2 {
                c.push(0x66);
            }
            let base_ext = mem.addr.base.map(|b| b.is_extended()).unwrap_or(false);
            push_rex(&mut c, mem.w == 8, false, false, base_ext, false);
            if mem.w == 1 {
                c.push(0x80);
                encode_addr(&mut c, sink, ext, &mem.addr);
                c.push(imm.as_int().expect("integer immediate") as u8);
            } else if is_byte_imm(imm) {
                c.push(0x83);
                encode_addr(&mut c, sink, ext, &mem.addr);
                c.push(imm.as_int().unwrap() as u8);
            } else {
                assert!(is_32bit_imm(imm), "immediate out of range");
                c.push(0x81);
                encode_addr(&mut c, sink, ext, &mem.addr);
                c.push32(imm.as_int().unwrap() as i32);
            }
        }
        _ => unreachable!(),
    }
    c
}

/// add/sub/cmp/and/or/xor over the operand forms the back-end emits.
fn alu(sink: &mut dyn RelocSink, reg_base: u8, imm_ext: u8, operands: &Operands) -> Code {
    match operands {
        Operands::RegReg(src, dst) => {
            assert!(src.w == dst.w, "alu operand widths differ");
            let mut c = Code::new();
            if src.is_16() {
                c.push(0x66);
            }
            rex_for_rm(&mut c, *src, *dst);
            c.push(reg_base | w_bit(src.w));
            c.push(modrm_regs(*src, *dst));
            c
        }
        Operands::ImmReg(..) | Operands::ImmMem(..) => alu_imm(sink, imm_ext, operands),
        _ => panic!("unsupported alu operands"),
    }
}

/// Shift group: the count operand must be CL.
fn shift(ext: u8, operands: &Operands) -> Code {
    let mut c = Code::new();
    let (count, dst) = match operands {
        Operands::RegReg(count, dst) => (count, dst),
        _ => panic!("shift requires register operands"),
    };
    assert!(
        count.r == super::instr::Register::Cx && count.w == 1,
        "shift count must be in cl"
    );
    if dst.is_16() {
        c.push(0x66);
    }
    push_rex(
        &mut c,
        dst.is_64(),
        false,
        false,
        dst.r.is_extended(),
        dst.needs_rex_for_byte(),
    );
    c.push(0xD2 | w_bit(dst.w));
    c.push(0xC0 | ext << 3 | dst.r.low3());
    c
}

/// Group-3 unary forms (not /2, mul /4, div /6).
fn group3(sink: &mut dyn RelocSink, ext: u8, operands: &Operands) -> Code {
    let mut c = Code::new();
    match operands {
        Operands::Reg(reg) => {
            push_rex(
                &mut c,
                reg.is_64(),
                false,
                false,
                reg.r.is_extended(),
                reg.needs_rex_for_byte(),
            );
            c.push(0xF6 | w_bit(reg.w));
            c.push(0xC0 | ext << 3 | reg.r.low3());
        }
        Operands::Mem(mem) => {
            let base_ext = mem.addr.base.map(|b| b.is_extended()).unwrap_or(false);
            push_rex(&mut c, mem.w == 8, false, false, base_ext, false);
            c.push(0xF6 | w_bit(mem.w));
            encode_addr(&mut c, sink, ext, &mem.addr);
        }
        _ => panic!("unsupported group-3 operands"),
    }
    c
}

fn call(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    match operands {
        Operands::Imm(imm) => {
            let (sym, disp) = match imm.value {
                ImmValue::Addr(sym, disp) => (sym, disp),
                _ => panic!("direct call requires a symbol"),
            };
            c.push(0xE8);
            sink.add_reloc_text(sym, RelocKind::Pc32, c.len, i64::from(disp) - 4);
            c.push32(0);
        }
        Operands::Reg(reg) => {
            assert!(reg.is_64(), "indirect call goes through a 64-bit register");
            push_rex(&mut c, false, false, false, reg.r.is_extended(), false);
            c.push(0xFF);
            c.push(0xD0 | reg.r.low3());
        }
        _ => panic!("unsupported call operands"),
    }
    c
}

fn jump_target(operands: &Operands) -> (SymbolId, i32) {
    match operands {
        Operands::Imm(Immediate {
            value: ImmValue::Addr(sym, disp),
            ..
        }) => (*sym, *disp),
        _ => panic!("jump requires a symbol target"),
    }
}

fn jmp(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    let (sym, disp) = jump_target(operands);
    c.push(0xE9);
    // Subtract four: the displacement counts from past the immediate.
    let rel = sink.text_displacement(sym, c.len) + disp - 4;
    c.push32(rel);
    c
}

fn jcc(sink: &mut dyn RelocSink, cond: Cond, operands: &Operands) -> Code {
    let mut c = Code::new();
    let (sym, disp) = jump_target(operands);
    c.push(0x0F);
    c.push(0x80 | cond as u8);
    let rel = sink.text_displacement(sym, c.len) + disp - 4;
    c.push32(rel);
    c
}

fn setcc(cond: Cond, operands: &Operands) -> Code {
    let mut c = Code::new();
    let reg = match operands {
        Operands::Reg(reg) => reg,
        _ => panic!("setcc requires a register operand"),
    };
    assert!(reg.w == 1, "setcc operates on a byte register");
    push_rex(
        &mut c,
        false,
        false,
        false,
        reg.r.is_extended(),
        reg.needs_rex_for_byte(),
    );
    c.push(0x0F);
    c.push(0x90 | cond as u8);
    c.push(0xC0 | reg.r.low3());
    c
}

fn test(operands: &Operands) -> Code {
    let mut c = Code::new();
    let (src, dst) = match operands {
        Operands::RegReg(src, dst) => (src, dst),
        _ => panic!("test requires register operands"),
    };
    rex_for_rm(&mut c, *src, *dst);
    c.push(0x84 | w_bit(src.w));
    c.push(modrm_regs(*src, *dst));
    c
}

fn lea(sink: &mut dyn RelocSink, operands: &Operands) -> Code {
    let mut c = Code::new();
    let (mem, dst) = match operands {
        Operands::MemReg(mem, dst) => (mem, dst),
        _ => panic!("lea requires mem, reg operands"),
    };
    assert!(dst.is_64(), "lea destination must be 64-bit");
    rex_for_mem(&mut c, *dst, mem);
    c.push(0x8D);
    encode_addr(&mut c, sink, dst.r.low3(), &mem.addr);
    c
}

fn fixed(bytes: &[u8]) -> Code {
    let mut c = Code::new();
    for &b in bytes {
        c.push(b);
    }
    c
}

/// Encode one instruction. The only observable side effect is relocation
/// registration through the sink.
pub fn encode(instr: &Instruction, sink: &mut dyn RelocSink) -> Code {
    match instr.opcode {
        Opcode::Mov => mov(sink, &instr.operands),
        Opcode::Movsx => movsx(sink, &instr.operands),
        Opcode::Movzx => movzx(sink, &instr.operands),
        Opcode::Movaps => movaps(sink, &instr.operands),
        Opcode::Push => push(&instr.operands),
        Opcode::Add => alu(sink, 0x00, 0, &instr.operands),
        Opcode::Or => alu(sink, 0x08, 1, &instr.operands),
        Opcode::And => alu(sink, 0x20, 4, &instr.operands),
        Opcode::Sub => alu(sink, 0x28, 5, &instr.operands),
        Opcode::Xor => alu(sink, 0x30, 6, &instr.operands),
        Opcode::Cmp => alu(sink, 0x38, 7, &instr.operands),
        // SDM shift-group extensions: shl /4, shr /5, sar /7.
        Opcode::Shl => shift(0x4, &instr.operands),
        Opcode::Shr => shift(0x5, &instr.operands),
        Opcode::Sar => shift(0x7, &instr.operands),
        Opcode::Not => group3(sink, 0x2, &instr.operands),
        Opcode::Mul => group3(sink, 0x4, &instr.operands),
        Opcode::Div => group3(sink, 0x6, &instr.operands),
        Opcode::Lea => lea(sink, &instr.operands),
        Opcode::Leave => fixed(&[0xC9]),
        Opcode::RepMovsq => fixed(&[0xF3, 0x48, 0xA5]),
        // Near return only.
        Opcode::Ret => fixed(&[0xC3]),
        Opcode::Call => call(sink, &instr.operands),
        Opcode::Jmp => jmp(sink, &instr.operands),
        Opcode::Jcc(cond) => jcc(sink, cond, &instr.operands),
        Opcode::Setcc(cond) => setcc(cond, &instr.operands),
        Opcode::Test => test(&instr.operands),
        Opcode::Nop => fixed(&[0x90]),
    }
}

#[cfg(test)]
mod tests {
    use super::super::instr::*;
    use super::*;

    /// Sink recording relocations; displacements resolve through a fixed
    /// offset map.
    #[derive(Default)]
    struct TestSink {
        relocs: Vec<(SymbolId, RelocKind, usize, i64)>,
        offsets: std::collections::HashMap<SymbolId, i32>,
        position: i32,
    }

    impl RelocSink for TestSink {
        fn add_reloc_text(
            &mut self,
            sym: SymbolId,
            kind: RelocKind,
            instr_offset: usize,
            addend: i64,
        ) {
            self.relocs.push((sym, kind, instr_offset, addend));
        }

        fn text_displacement(&mut self, sym: SymbolId, instr_offset: usize) -> i32 {
            let field = self.position + instr_offset as i32;
            self.offsets.get(&sym).map(|&t| t - field).unwrap_or(0)
        }
    }

    fn enc(instr: Instruction) -> Vec<u8> {
        let mut sink = TestSink::default();
        encode(&instr, &mut sink).as_slice().to_vec()
    }

    fn reg(r: Register, w: u8) -> Reg {
        Reg::new(r, w)
    }

    #[test]
    fn test_mov_imm64_rax() {
        // mov $0x12345678, %rax
        let i = Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(8, 0x12345678), reg(Register::Ax, 8)),
        );
        assert_eq!(enc(i), vec![0x48, 0xC7, 0xC0, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_mov_imm64_full_width() {
        let i = Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(8, 0x1122334455667788), reg(Register::Ax, 8)),
        );
        assert_eq!(
            enc(i),
            vec![0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn test_mov_imm32_eax_no_rex() {
        let i = Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(4, 42), reg(Register::Ax, 4)),
        );
        assert_eq!(enc(i), vec![0xB8, 42, 0, 0, 0]);
    }

    #[test]
    fn test_ret_leave_rep_movsq() {
        assert_eq!(enc(Instruction::nullary(Opcode::Ret)), vec![0xC3]);
        assert_eq!(
            enc(Instruction::nullary(Opcode::RepMovsq)),
            vec![0xF3, 0x48, 0xA5]
        );
        assert_eq!(enc(Instruction::nullary(Opcode::Leave)), vec![0xC9]);
    }

    #[test]
    fn test_prologue_shape() {
        // push %rbp; mov %rsp, %rbp
        let p = enc(Instruction::new(
            Opcode::Push,
            Operands::Reg(reg(Register::Bp, 8)),
        ));
        assert_eq!(p, vec![0x55]);
        let m = enc(Instruction::new(
            Opcode::Mov,
            Operands::RegReg(reg(Register::Sp, 8), reg(Register::Bp, 8)),
        ));
        assert_eq!(m, vec![0x48, 0x89, 0xE5]);
    }

    #[test]
    fn test_add_reg_reg_64() {
        // add %rcx, %rax
        let i = Instruction::new(
            Opcode::Add,
            Operands::RegReg(reg(Register::Cx, 8), reg(Register::Ax, 8)),
        );
        assert_eq!(enc(i), vec![0x48, 0x01, 0xC8]);
    }

    #[test]
    fn test_add_imm_forms() {
        // add $8, %rsp uses the sign-extended byte form.
        let i = Instruction::new(
            Opcode::Add,
            Operands::ImmReg(Immediate::int(8, 8), reg(Register::Sp, 8)),
        );
        assert_eq!(enc(i), vec![0x48, 0x83, 0xC4, 0x08]);
        // add $0x1000, %rax needs the 32-bit immediate form.
        let i = Instruction::new(
            Opcode::Add,
            Operands::ImmReg(Immediate::int(8, 0x1000), reg(Register::Ax, 8)),
        );
        assert_eq!(enc(i), vec![0x48, 0x81, 0xC0, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_add_imm_mem() {
        // addl $1, -4(%rbp)
        let i = Instruction::new(
            Opcode::Add,
            Operands::ImmMem(
                Immediate::int(4, 1),
                Mem::new(4, Address::base(Register::Bp, -4)),
            ),
        );
        assert_eq!(enc(i), vec![0x83, 0x45, 0xFC, 0x01]);
    }

    #[test]
    fn test_sub_imm_rsp() {
        // sub $32, %rsp
        let i = Instruction::new(
            Opcode::Sub,
            Operands::ImmReg(Immediate::int(8, 32), reg(Register::Sp, 8)),
        );
        assert_eq!(enc(i), vec![0x48, 0x83, 0xEC, 0x20]);
    }

    #[test]
    fn test_shift_group_extensions() {
        let cl = reg(Register::Cx, 1);
        // shl %cl, %rax is D3 /4; shr is /5; sar is /7.
        let shl = enc(Instruction::new(
            Opcode::Shl,
            Operands::RegReg(cl, reg(Register::Ax, 8)),
        ));
        assert_eq!(shl, vec![0x48, 0xD3, 0xE0]);
        let shr = enc(Instruction::new(
            Opcode::Shr,
            Operands::RegReg(cl, reg(Register::Ax, 8)),
        ));
        assert_eq!(shr, vec![0x48, 0xD3, 0xE8]);
        let sar = enc(Instruction::new(
            Opcode::Sar,
            Operands::RegReg(cl, reg(Register::Ax, 8)),
        ));
        assert_eq!(sar, vec![0x48, 0xD3, 0xF8]);
    }

    #[test]
    fn test_not_rex_rules() {
        // not %eax: no REX.
        let i = enc(Instruction::new(
            Opcode::Not,
            Operands::Reg(reg(Register::Ax, 4)),
        ));
        assert_eq!(i, vec![0xF7, 0xD0]);
        // not %r9: REX.W + B.
        let i = enc(Instruction::new(
            Opcode::Not,
            Operands::Reg(reg(Register::R9, 8)),
        ));
        assert_eq!(i, vec![0x49, 0xF7, 0xD1]);
        // not %sil: bare REX selects the uniform byte register.
        let i = enc(Instruction::new(
            Opcode::Not,
            Operands::Reg(reg(Register::Si, 1)),
        ));
        assert_eq!(i, vec![0x40, 0xF6, 0xD6]);
    }

    #[test]
    fn test_mul_div_forms() {
        // mul %rcx; div %rcx
        let m = enc(Instruction::new(
            Opcode::Mul,
            Operands::Reg(reg(Register::Cx, 8)),
        ));
        assert_eq!(m, vec![0x48, 0xF7, 0xE1]);
        let d = enc(Instruction::new(
            Opcode::Div,
            Operands::Reg(reg(Register::Cx, 8)),
        ));
        assert_eq!(d, vec![0x48, 0xF7, 0xF1]);
    }

    #[test]
    fn test_mem_displacement_sizes() {
        // mov -8(%rbp), %rax: disp8 form.
        let i = enc(Instruction::new(
            Opcode::Mov,
            Operands::MemReg(
                Mem::new(8, Address::base(Register::Bp, -8)),
                reg(Register::Ax, 8),
            ),
        ));
        assert_eq!(i, vec![0x48, 0x8B, 0x45, 0xF8]);
        // mov -0x200(%rbp), %rax: disp32 form.
        let i = enc(Instruction::new(
            Opcode::Mov,
            Operands::MemReg(
                Mem::new(8, Address::base(Register::Bp, -0x200)),
                reg(Register::Ax, 8),
            ),
        ));
        assert_eq!(i, vec![0x48, 0x8B, 0x85, 0x00, 0xFE, 0xFF, 0xFF]);
        // Zero displacement from a non-rbp base drops the disp byte.
        let i = enc(Instruction::new(
            Opcode::Mov,
            Operands::MemReg(
                Mem::new(8, Address::base(Register::Cx, 0)),
                reg(Register::Ax, 8),
            ),
        ));
        assert_eq!(i, vec![0x48, 0x8B, 0x01]);
    }

    #[test]
    fn test_rip_relative_registers_pc32() {
        let sym = SymbolId(7);
        let mut sink = TestSink::default();
        let i = Instruction::new(
            Opcode::Mov,
            Operands::MemReg(Mem::new(4, Address::symbol(sym, 0)), reg(Register::Ax, 4)),
        );
        let code = encode(&i, &mut sink);
        assert_eq!(code.as_slice(), &[0x8B, 0x05, 0, 0, 0, 0]);
        assert_eq!(sink.relocs.len(), 1);
        let (rsym, kind, offset, addend) = sink.relocs[0];
        assert_eq!(rsym, sym);
        assert_eq!(kind, RelocKind::Pc32);
        assert_eq!(offset, 2);
        assert_eq!(addend, -4);
    }

    #[test]
    fn test_mov_symbol_address_abs32s() {
        let sym = SymbolId(5);
        let mut sink = TestSink::default();
        let i = Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::addr(sym, 0), reg(Register::Ax, 8)),
        );
        let code = encode(&i, &mut sink);
        assert_eq!(code.as_slice(), &[0x48, 0xC7, 0xC0, 0, 0, 0, 0]);
        assert_eq!(sink.relocs[0].1, RelocKind::Abs32S);
        assert_eq!(sink.relocs[0].2, 3);
        assert_eq!(sink.relocs[0].3, 0);
    }

    #[test]
    fn test_call_direct_emits_pc32() {
        let sym = SymbolId(3);
        let mut sink = TestSink::default();
        let i = Instruction::new(Opcode::Call, Operands::Imm(Immediate::addr(sym, 0)));
        let code = encode(&i, &mut sink);
        assert_eq!(code.as_slice(), &[0xE8, 0, 0, 0, 0]);
        assert_eq!(sink.relocs[0].1, RelocKind::Pc32);
        assert_eq!(sink.relocs[0].3, -4);
    }

    #[test]
    fn test_call_indirect() {
        // call *%r11
        let i = enc(Instruction::new(
            Opcode::Call,
            Operands::Reg(reg(Register::R11, 8)),
        ));
        assert_eq!(i, vec![0x41, 0xFF, 0xD3]);
    }

    #[test]
    fn test_jump_displacement_arithmetic() {
        // Backward jump: target at 0x10, instruction at 0x20. The field
        // starts at 0x21, so the displacement is 0x10 - 0x21 - 4.
        let sym = SymbolId(9);
        let mut sink = TestSink::default();
        sink.offsets.insert(sym, 0x10);
        sink.position = 0x20;
        let i = Instruction::new(Opcode::Jmp, Operands::Imm(Immediate::addr(sym, 0)));
        let code = encode(&i, &mut sink);
        assert_eq!(code.val[0], 0xE9);
        let disp = i32::from_le_bytes(code.val[1..5].try_into().unwrap());
        assert_eq!(disp, 0x10 - (0x20 + 1) - 4);
    }

    #[test]
    fn test_jcc_form() {
        let sym = SymbolId(4);
        let mut sink = TestSink::default();
        sink.offsets.insert(sym, 0);
        let i = Instruction::new(Opcode::Jcc(Cond::Z), Operands::Imm(Immediate::addr(sym, 0)));
        let code = encode(&i, &mut sink);
        assert_eq!(code.val[0], 0x0F);
        assert_eq!(code.val[1], 0x84);
        assert_eq!(code.len, 6);
    }

    #[test]
    fn test_setcc_movzx_compare_tail() {
        // sete %al; movzbl %al, %eax
        let s = enc(Instruction::new(
            Opcode::Setcc(Cond::Z),
            Operands::Reg(reg(Register::Ax, 1)),
        ));
        assert_eq!(s, vec![0x0F, 0x94, 0xC0]);
        let m = enc(Instruction::new(
            Opcode::Movzx,
            Operands::RegReg(reg(Register::Ax, 1), reg(Register::Ax, 4)),
        ));
        assert_eq!(m, vec![0x0F, 0xB6, 0xC0]);
    }

    #[test]
    fn test_lea_rbp_slot() {
        // lea -16(%rbp), %rdi
        let i = enc(Instruction::new(
            Opcode::Lea,
            Operands::MemReg(
                Mem::new(8, Address::base(Register::Bp, -16)),
                reg(Register::Di, 8),
            ),
        ));
        assert_eq!(i, vec![0x48, 0x8D, 0x7D, 0xF0]);
    }

    #[test]
    fn test_movsxd_form() {
        // movslq -4(%rbp), %rax
        let i = enc(Instruction::new(
            Opcode::Movsx,
            Operands::MemReg(
                Mem::new(4, Address::base(Register::Bp, -4)),
                reg(Register::Ax, 8),
            ),
        ));
        assert_eq!(i, vec![0x48, 0x63, 0x45, 0xFC]);
    }

    #[test]
    fn test_movzx_byte_load() {
        // movzbl -1(%rbp), %eax
        let i = enc(Instruction::new(
            Opcode::Movzx,
            Operands::MemReg(
                Mem::new(1, Address::base(Register::Bp, -1)),
                reg(Register::Ax, 4),
            ),
        ));
        assert_eq!(i, vec![0x0F, 0xB6, 0x45, 0xFF]);
    }

    #[test]
    fn test_movaps_store() {
        // movaps %xmm0, -16(%rbp)
        let i = enc(Instruction::new(
            Opcode::Movaps,
            Operands::RegMem(
                reg(Register::Xmm0, 8),
                Mem::new(8, Address::base(Register::Bp, -16)),
            ),
        ));
        assert_eq!(i, vec![0x0F, 0x29, 0x45, 0xF0]);
    }

    #[test]
    fn test_encoder_determinism() {
        let i = Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(8, 0x12345678), reg(Register::Ax, 8)),
        );
        let mut s1 = TestSink::default();
        let mut s2 = TestSink::default();
        let c1 = encode(&i, &mut s1);
        let c2 = encode(&i, &mut s2);
        assert_eq!(c1.as_slice(), c2.as_slice());
        assert_eq!(s1.relocs, s2.relocs);
    }
}
