use enum_iterator::IntoEnumIterator;
use indexmap::IndexMap;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Serialize, Serializer};
use std::fmt::{self, Debug, Display, Formatter};
use std::iter::FromIterator;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};
use support::Range;

mod effects;
mod parser;

pub use effects::Class;
pub use parser::parse;

/// Machine state tracked by the analysis: the accumulator, both index
/// registers, and the carry and zero flags.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  FromPrimitive,
  IntoEnumIterator,
  Serialize,
)]
pub enum Reg {
  A,
  X,
  Y,
  C,
  Z,
}

impl Reg {
  pub fn name(self) -> &'static str {
    match self {
      Self::A => "A",
      Self::X => "X",
      Self::Y => "Y",
      Self::C => "C",
      Self::Z => "Z",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::into_enum_iter().find(|reg| reg.name().eq_ignore_ascii_case(name))
  }

  fn bit(self) -> u8 {
    1 << self as u8
  }
}

impl Display for Reg {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A subset of [`Reg`]. This is the lattice the liveness analysis works in.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegSet(u8);

impl RegSet {
  pub fn new() -> Self {
    Self(0)
  }

  pub fn all() -> Self {
    Reg::into_enum_iter().collect()
  }

  pub fn regs<const N: usize>(regs: [Reg; N]) -> Self {
    regs.into_iter().collect()
  }

  pub fn add(&mut self, reg: Reg) {
    self.0 |= reg.bit();
  }

  pub fn remove(&mut self, reg: Reg) {
    self.0 &= !reg.bit();
  }

  pub fn contains(self, reg: Reg) -> bool {
    self.0 & reg.bit() != 0
  }

  pub fn is_empty(self) -> bool {
    self.0 == 0
  }

  pub fn is_subset(self, other: Self) -> bool {
    self.0 & !other.0 == 0
  }

  pub fn len(self) -> usize {
    self.0.count_ones() as usize
  }

  pub fn iter(self) -> impl Iterator<Item = Reg> {
    (0..8u8)
      .filter(move |i| self.0 & (1 << i) != 0)
      .filter_map(Reg::from_u8)
  }
}

impl FromIterator<Reg> for RegSet {
  fn from_iter<I: IntoIterator<Item = Reg>>(iter: I) -> Self {
    let mut set = Self::new();
    for reg in iter {
      set.add(reg);
    }
    set
  }
}

impl BitOr for RegSet {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl BitOrAssign for RegSet {
  fn bitor_assign(&mut self, rhs: Self) {
    self.0 |= rhs.0;
  }
}

impl BitAnd for RegSet {
  type Output = Self;

  fn bitand(self, rhs: Self) -> Self {
    Self(self.0 & rhs.0)
  }
}

impl Sub for RegSet {
  type Output = Self;

  fn sub(self, rhs: Self) -> Self {
    Self(self.0 & !rhs.0)
  }
}

impl Debug for RegSet {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{{")?;
    for (i, reg) in self.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", reg)?;
    }
    write!(f, "}}")
  }
}

impl Display for RegSet {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    Debug::fmt(self, f)
  }
}

impl Serialize for RegSet {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(self.iter())
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoEnumIterator,
)]
pub enum Mnemonic {
  Adc,
  And,
  Asl,
  Bcc,
  Bcs,
  Beq,
  Bit,
  Bmi,
  Bne,
  Bpl,
  Bra,
  Brk,
  Bvc,
  Bvs,
  Clc,
  Cld,
  Cli,
  Clv,
  Cmp,
  Cpx,
  Cpy,
  Dec,
  Dex,
  Dey,
  Eor,
  Inc,
  Inx,
  Iny,
  Jmp,
  Jsr,
  Lda,
  Ldx,
  Ldy,
  Lsr,
  Nop,
  Ora,
  Pha,
  Php,
  Phx,
  Phy,
  Pla,
  Plp,
  Plx,
  Ply,
  Rol,
  Ror,
  Rti,
  Rts,
  Sbc,
  Sec,
  Sed,
  Sei,
  Sta,
  Stx,
  Sty,
  Stz,
  Tax,
  Tay,
  Trb,
  Tsb,
  Tsx,
  Txa,
  Txs,
  Tya,
}

impl Mnemonic {
  pub fn from_name(name: &str) -> Option<Self> {
    Self::into_enum_iter().find(|m| m.name().eq_ignore_ascii_case(name))
  }

  pub fn name(self) -> &'static str {
    use Mnemonic::*;
    match self {
      Adc => "ADC",
      And => "AND",
      Asl => "ASL",
      Bcc => "BCC",
      Bcs => "BCS",
      Beq => "BEQ",
      Bit => "BIT",
      Bmi => "BMI",
      Bne => "BNE",
      Bpl => "BPL",
      Bra => "BRA",
      Brk => "BRK",
      Bvc => "BVC",
      Bvs => "BVS",
      Clc => "CLC",
      Cld => "CLD",
      Cli => "CLI",
      Clv => "CLV",
      Cmp => "CMP",
      Cpx => "CPX",
      Cpy => "CPY",
      Dec => "DEC",
      Dex => "DEX",
      Dey => "DEY",
      Eor => "EOR",
      Inc => "INC",
      Inx => "INX",
      Iny => "INY",
      Jmp => "JMP",
      Jsr => "JSR",
      Lda => "LDA",
      Ldx => "LDX",
      Ldy => "LDY",
      Lsr => "LSR",
      Nop => "NOP",
      Ora => "ORA",
      Pha => "PHA",
      Php => "PHP",
      Phx => "PHX",
      Phy => "PHY",
      Pla => "PLA",
      Plp => "PLP",
      Plx => "PLX",
      Ply => "PLY",
      Rol => "ROL",
      Ror => "ROR",
      Rti => "RTI",
      Rts => "RTS",
      Sbc => "SBC",
      Sec => "SEC",
      Sed => "SED",
      Sei => "SEI",
      Sta => "STA",
      Stx => "STX",
      Sty => "STY",
      Stz => "STZ",
      Tax => "TAX",
      Tay => "TAY",
      Trb => "TRB",
      Tsb => "TSB",
      Tsx => "TSX",
      Txa => "TXA",
      Txs => "TXS",
      Tya => "TYA",
    }
  }

  /// Shifts, rotates and the 65C02 `INC A`/`DEC A`.
  pub fn has_accumulator_form(self) -> bool {
    use Mnemonic::*;
    matches!(self, Asl | Lsr | Rol | Ror | Inc | Dec)
  }
}

impl Display for Mnemonic {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  Implied,
  Accumulator,
  Immediate(Expr),
  Memory(Mode, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// `addr`, zero page or absolute.
  Direct,
  /// `addr,X`
  IndexedX,
  /// `addr,Y`
  IndexedY,
  /// `(addr)`
  Indirect,
  /// `(zp,X)`, or `(abs,X)` for `JMP`.
  IndexedIndirect,
  /// `(zp),Y`
  IndirectIndexed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  Number(u16),
  Symbol(String),
  /// Anything the analysis does not evaluate, kept verbatim.
  Computed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
  pub address: u16,
  pub mnemonic: Mnemonic,
  pub operand: Operand,
  pub size: u16,
  pub range: Range,
}

impl Instr {
  pub fn class(&self) -> Class {
    self.mnemonic.class()
  }

  /// Address of the instruction that follows in memory.
  pub fn next_address(&self) -> u32 {
    self.address as u32 + self.size as u32
  }

  /// The operand naming the destination of a branch, jump or call.
  pub fn target(&self) -> Option<&Expr> {
    match (self.class(), &self.operand) {
      (
        Class::BranchConditional | Class::Jump | Class::Call,
        Operand::Memory(_, expr),
      ) => Some(expr),
      _ => None,
    }
  }

  pub fn is_indirect_jump(&self) -> bool {
    self.mnemonic == Mnemonic::Jmp
      && matches!(
        self.operand,
        Operand::Memory(Mode::Indirect | Mode::IndexedIndirect, _)
      )
  }
}

impl Display for Instr {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match &self.operand {
      Operand::Implied => write!(f, "{}", self.mnemonic),
      operand => write!(f, "{} {}", self.mnemonic, operand),
    }
  }
}

impl Display for Operand {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match self {
      Self::Implied => Ok(()),
      Self::Accumulator => write!(f, "A"),
      Self::Immediate(expr) => write!(f, "#{}", expr),
      Self::Memory(mode, expr) => match mode {
        Mode::Direct => write!(f, "{}", expr),
        Mode::IndexedX => write!(f, "{},X", expr),
        Mode::IndexedY => write!(f, "{},Y", expr),
        Mode::Indirect => write!(f, "({})", expr),
        Mode::IndexedIndirect => write!(f, "({},X)", expr),
        Mode::IndirectIndexed => write!(f, "({}),Y", expr),
      },
    }
  }
}

impl Display for Expr {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match self {
      Self::Number(n) if *n < 0x100 => write!(f, "&{:02X}", n),
      Self::Number(n) => write!(f, "&{:04X}", n),
      Self::Symbol(name) | Self::Computed(name) => f.write_str(name),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
  /// `.name`, bound to the assembly address where it appears.
  Label,
  /// `name = value`
  Constant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub address: u16,
  pub kind: SymbolKind,
  pub range: Range,
}

/// An assembled listing: instructions in address order plus every name the
/// listing defines.
#[derive(Debug, Clone, Default)]
pub struct Program {
  pub instrs: Vec<Instr>,
  pub symbols: IndexMap<String, Symbol>,
  /// `(address, length)` of every data directive.
  pub data: Vec<(u16, u16)>,
}

impl Program {
  pub fn instr_index(&self, address: u16) -> Option<usize> {
    self
      .instrs
      .binary_search_by_key(&address, |instr| instr.address)
      .ok()
  }

  /// Whether `address` lies inside an assembled instruction or data
  /// directive.
  pub fn covers(&self, address: u16) -> bool {
    let address = address as u32;
    let in_code = match self
      .instrs
      .binary_search_by_key(&address, |instr| instr.address as u32)
    {
      Ok(_) => true,
      Err(0) => false,
      Err(i) => self.instrs[i - 1].next_address() > address,
    };
    in_code
      || self.data.iter().any(|&(start, len)| {
        start as u32 <= address && address < start as u32 + len as u32
      })
  }

  /// Every name bound to `address`, in definition order.
  pub fn labels_at(&self, address: u16) -> Vec<&str> {
    self
      .symbols
      .iter()
      .filter(|(_, sym)| sym.address == address)
      .map(|(name, _)| name.as_str())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn reg_set_ops() {
    use Reg::*;
    let set = RegSet::regs([A, Y]);
    assert!(set.contains(A));
    assert!(!set.contains(X));
    assert_eq!(set.len(), 2);
    assert_eq!(set | RegSet::regs([C]), RegSet::regs([A, Y, C]));
    assert_eq!(set - RegSet::regs([A, Z]), RegSet::regs([Y]));
    assert_eq!(set & RegSet::regs([Y, Z]), RegSet::regs([Y]));
    assert!(RegSet::regs([Y]).is_subset(set));
    assert!(!set.is_subset(RegSet::regs([Y])));
    assert!(RegSet::new().is_empty());
    assert_eq!(RegSet::all().len(), 5);
  }

  #[test]
  fn reg_set_iterates_in_declaration_order() {
    use Reg::*;
    let set = RegSet::regs([Z, X, C]);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![X, C, Z]);
    assert_eq!(format!("{:?}", set), "{X, C, Z}");
    assert_eq!(format!("{}", RegSet::new()), "{}");
  }

  #[test]
  fn reg_names() {
    assert_eq!(Reg::from_name("y"), Some(Reg::Y));
    assert_eq!(Reg::from_name("C"), Some(Reg::C));
    assert_eq!(Reg::from_name("N"), None);
  }

  #[test]
  fn mnemonic_names() {
    assert_eq!(Mnemonic::from_name("jsr"), Some(Mnemonic::Jsr));
    assert_eq!(Mnemonic::from_name("STZ"), Some(Mnemonic::Stz));
    assert_eq!(Mnemonic::from_name("XYZ"), None);
    for m in Mnemonic::into_enum_iter() {
      assert_eq!(Mnemonic::from_name(m.name()), Some(m));
    }
  }

  #[test]
  fn display_instr() {
    let prog = parse(
      r#"
      ORG &8000
      LDA (&19),Y
      JMP (&020E)
      ASL A
      CMP #&20
      RTS
    "#,
    )
    .unwrap();
    let text: Vec<_> = prog.instrs.iter().map(|i| i.to_string()).collect();
    assert_eq!(
      text,
      vec!["LDA (&19),Y", "JMP (&020E)", "ASL A", "CMP #&20", "RTS"]
    );
  }

  #[test]
  fn covers_code_and_data() {
    let prog = parse(
      r#"
      ORG &8000
      LDA &1234
      EQUB 1, 2
      RTS
    "#,
    )
    .unwrap();
    assert!(prog.covers(0x8000));
    assert!(prog.covers(0x8002));
    assert!(prog.covers(0x8004));
    assert!(prog.covers(0x8005));
    assert!(!prog.covers(0x8006));
    assert!(!prog.covers(0x7fff));
  }
}
