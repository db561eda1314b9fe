//! Register and flag effects of each instruction.
//!
//! Only the state in [`Reg`] is modelled. Memory, the stack pointer and the
//! N, V, D and I flags are not, so an instruction like `CLD` has no visible
//! effect here even though it is not a `NOP`.

use crate::{Instr, Mnemonic, Mode, Operand, Reg, RegSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
  Load,
  Store,
  Arithmetic,
  Compare,
  BranchConditional,
  Jump,
  Call,
  Return,
  FlagOp,
  Transfer,
  StackOp,
  Nop,
}

impl Mnemonic {
  pub fn class(self) -> Class {
    use Mnemonic::*;
    match self {
      Lda | Ldx | Ldy => Class::Load,
      Sta | Stx | Sty | Stz => Class::Store,
      Adc | Sbc | And | Ora | Eor | Asl | Lsr | Rol | Ror | Inc | Dec | Inx
      | Iny | Dex | Dey | Trb | Tsb => Class::Arithmetic,
      Cmp | Cpx | Cpy | Bit => Class::Compare,
      Bcc | Bcs | Beq | Bne | Bmi | Bpl | Bvc | Bvs => Class::BranchConditional,
      Jmp | Bra => Class::Jump,
      Jsr => Class::Call,
      Rts | Rti | Brk => Class::Return,
      Clc | Sec | Cld | Sed | Cli | Sei | Clv => Class::FlagOp,
      Tax | Tay | Txa | Tya | Tsx | Txs => Class::Transfer,
      Pha | Php | Phx | Phy | Pla | Plp | Plx | Ply => Class::StackOp,
      Nop => Class::Nop,
    }
  }
}

impl Instr {
  pub fn reads(&self) -> RegSet {
    use Mnemonic::*;
    use Reg::*;
    let accumulator = self.operand == Operand::Accumulator;
    let mut set = match self.mnemonic {
      Adc | Sbc => RegSet::regs([A, C]),
      And | Ora | Eor | Cmp | Bit | Trb | Tsb => RegSet::regs([A]),
      Sta | Pha | Tax | Tay => RegSet::regs([A]),
      Stx | Phx | Txa | Txs | Cpx | Inx | Dex => RegSet::regs([X]),
      Sty | Phy | Tya | Cpy | Iny | Dey => RegSet::regs([Y]),
      Php => RegSet::regs([C, Z]),
      Beq | Bne => RegSet::regs([Z]),
      Bcc | Bcs => RegSet::regs([C]),
      Asl | Lsr | Inc | Dec if accumulator => RegSet::regs([A]),
      Rol | Ror if accumulator => RegSet::regs([A, C]),
      Rol | Ror => RegSet::regs([C]),
      _ => RegSet::new(),
    };
    if let Operand::Memory(mode, _) = &self.operand {
      match mode {
        Mode::IndexedX | Mode::IndexedIndirect => set.add(X),
        Mode::IndexedY | Mode::IndirectIndexed => set.add(Y),
        Mode::Direct | Mode::Indirect => {}
      }
    }
    set
  }

  pub fn writes(&self) -> RegSet {
    use Mnemonic::*;
    use Reg::*;
    let accumulator = self.operand == Operand::Accumulator;
    match self.mnemonic {
      Lda | Pla | Txa | Tya => RegSet::regs([A, Z]),
      Ldx | Plx | Tax | Tsx | Inx | Dex => RegSet::regs([X, Z]),
      Ldy | Ply | Tay | Iny | Dey => RegSet::regs([Y, Z]),
      Adc | Sbc => RegSet::regs([A, C, Z]),
      And | Ora | Eor => RegSet::regs([A, Z]),
      Cmp | Cpx | Cpy => RegSet::regs([C, Z]),
      Bit | Trb | Tsb => RegSet::regs([Z]),
      Asl | Lsr | Rol | Ror if accumulator => RegSet::regs([A, C, Z]),
      Asl | Lsr | Rol | Ror => RegSet::regs([C, Z]),
      Inc | Dec if accumulator => RegSet::regs([A, Z]),
      Inc | Dec => RegSet::regs([Z]),
      Clc | Sec => RegSet::regs([C]),
      Plp | Rti => RegSet::regs([C, Z]),
      _ => RegSet::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse;
  use pretty_assertions::assert_eq;
  use Reg::*;

  fn effects(source: &str) -> (Class, RegSet, RegSet) {
    let prog = parse(&format!("ORG &8000\n{}\n", source)).unwrap();
    let instr = &prog.instrs[0];
    (instr.class(), instr.reads(), instr.writes())
  }

  #[test]
  fn loads_and_stores() {
    assert_eq!(
      effects("LDA (&70),Y"),
      (Class::Load, RegSet::regs([Y]), RegSet::regs([A, Z]))
    );
    assert_eq!(
      effects("LDX #0"),
      (Class::Load, RegSet::new(), RegSet::regs([X, Z]))
    );
    assert_eq!(
      effects("STY &72"),
      (Class::Store, RegSet::regs([Y]), RegSet::new())
    );
    assert_eq!(
      effects("STA &0400,X"),
      (Class::Store, RegSet::regs([A, X]), RegSet::new())
    );
  }

  #[test]
  fn arithmetic_reads_carry() {
    assert_eq!(
      effects("ADC #1"),
      (Class::Arithmetic, RegSet::regs([A, C]), RegSet::regs([A, C, Z]))
    );
    assert_eq!(
      effects("ROL A"),
      (Class::Arithmetic, RegSet::regs([A, C]), RegSet::regs([A, C, Z]))
    );
    assert_eq!(
      effects("LSR &70"),
      (Class::Arithmetic, RegSet::new(), RegSet::regs([C, Z]))
    );
    assert_eq!(
      effects("INY"),
      (Class::Arithmetic, RegSet::regs([Y]), RegSet::regs([Y, Z]))
    );
  }

  #[test]
  fn compares_and_branches() {
    assert_eq!(
      effects("CPY #5"),
      (Class::Compare, RegSet::regs([Y]), RegSet::regs([C, Z]))
    );
    assert_eq!(
      effects("BEQ &8000"),
      (Class::BranchConditional, RegSet::regs([Z]), RegSet::new())
    );
    assert_eq!(
      effects("BCS &8000"),
      (Class::BranchConditional, RegSet::regs([C]), RegSet::new())
    );
    assert_eq!(
      effects("BMI &8000"),
      (Class::BranchConditional, RegSet::new(), RegSet::new())
    );
  }

  #[test]
  fn stack_and_transfers() {
    assert_eq!(
      effects("PHP"),
      (Class::StackOp, RegSet::regs([C, Z]), RegSet::new())
    );
    assert_eq!(
      effects("PLY"),
      (Class::StackOp, RegSet::new(), RegSet::regs([Y, Z]))
    );
    assert_eq!(
      effects("TXA"),
      (Class::Transfer, RegSet::regs([X]), RegSet::regs([A, Z]))
    );
    assert_eq!(
      effects("TXS"),
      (Class::Transfer, RegSet::regs([X]), RegSet::new())
    );
  }

  #[test]
  fn control_and_flags() {
    assert_eq!(
      effects("JMP (&020E,X)"),
      (Class::Jump, RegSet::regs([X]), RegSet::new())
    );
    assert_eq!(
      effects("JSR &FFEE"),
      (Class::Call, RegSet::new(), RegSet::new())
    );
    assert_eq!(
      effects("SEC"),
      (Class::FlagOp, RegSet::new(), RegSet::regs([C]))
    );
    assert_eq!(effects("NOP"), (Class::Nop, RegSet::new(), RegSet::new()));
  }

  #[test]
  fn only_nop_is_inert_among_data_instructions() {
    use enum_iterator::IntoEnumIterator;
    for m in Mnemonic::into_enum_iter() {
      let class = m.class();
      if matches!(
        class,
        Class::Load | Class::Arithmetic | Class::Compare | Class::Transfer
      ) {
        let operand = if m.has_accumulator_form() {
          "A"
        } else if matches!(class, Class::Transfer)
          || matches!(m, Mnemonic::Inx | Mnemonic::Iny | Mnemonic::Dex)
          || matches!(m, Mnemonic::Dey)
        {
          ""
        } else {
          "&70"
        };
        let (_, reads, writes) = effects(&format!("{} {}", m, operand));
        assert!(
          !reads.is_empty() || !writes.is_empty(),
          "{} has no visible effect",
          m
        );
      }
    }
  }
}
