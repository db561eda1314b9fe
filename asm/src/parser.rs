use crate::{
  Class, Expr, Instr, Mnemonic, Mode, Operand, Program, Symbol, SymbolKind,
};
use indexmap::map::Entry;
use indexmap::IndexMap;
use support::{MalformedProgramError, Range};

pub type Result<T> = std::result::Result<T, MalformedProgramError>;

/// One `:`-separated statement with comments stripped.
#[derive(Debug, Clone, Copy)]
struct Stmt<'a> {
  range: Range,
  text: &'a str,
}

impl<'a> Stmt<'a> {
  fn new(text: &'a str, start: usize) -> Self {
    let trimmed = text.trim_start();
    let start = start + (text.len() - trimmed.len());
    let text = trimmed.trim_end();
    Self {
      range: (start, start + text.len()).into(),
      text,
    }
  }

  /// The statement from byte `offset` on.
  fn rest(&self, offset: usize) -> Self {
    Self::new(&self.text[offset..], self.range.start + offset)
  }

  fn error(&self, message: String) -> MalformedProgramError {
    MalformedProgramError::new(self.range, message)
  }
}

/// Assembles a BeebAsm-style listing far enough to know every instruction's
/// address, operand and size.
pub fn parse(input: &str) -> Result<Program> {
  let stmts = split_statements(input);
  let mut parser = Parser::default();
  parser.collect_constants(&stmts)?;
  for &stmt in &stmts {
    parser.statement(stmt)?;
  }
  parser.finish()
}

fn split_statements(input: &str) -> Vec<Stmt<'_>> {
  let mut stmts = vec![];
  let mut line_start = 0;
  for line in input.split('\n') {
    let mut from = 0;
    let mut end = line.len();
    let mut in_string = false;
    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
      match c {
        '"' => in_string = !in_string,
        _ if in_string => {}
        '\'' => {
          // character literal, e.g. `#';'`
          chars.next();
          chars.next();
        }
        ';' | '\\' => {
          end = i;
          break;
        }
        ':' => {
          stmts.push(Stmt::new(&line[from..i], line_start + from));
          from = i + 1;
        }
        _ => {}
      }
    }
    stmts.push(Stmt::new(&line[from..end], line_start + from));
    line_start += line.len() + 1;
  }
  stmts.retain(|stmt| !stmt.text.is_empty());
  stmts
}

#[derive(Default)]
struct Parser {
  address: u32,
  symbols: IndexMap<String, Symbol>,
  instrs: Vec<Instr>,
  data: Vec<(u16, u16)>,
}

impl Parser {
  /// Constants may be used before they are defined, so they are bound
  /// before any instruction is sized.
  fn collect_constants(&mut self, stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
      if let Some((name, value)) = split_assignment(*stmt) {
        if let Some(address) = self.eval(value.text) {
          self.define(name, address, SymbolKind::Constant, stmt.range)?;
        }
      }
    }
    Ok(())
  }

  fn statement(&mut self, stmt: Stmt) -> Result<()> {
    if let Some(label) = stmt.text.strip_prefix('.') {
      let len = label.find(char::is_whitespace).unwrap_or(label.len());
      let name = &label[..len];
      if !is_identifier(name) {
        return Err(stmt.error(format!("invalid label name `{}`", name)));
      }
      let range = (stmt.range.start, stmt.range.start + 1 + len).into();
      let address = self.current(stmt)?;
      self.define(name, address, SymbolKind::Label, range)?;
      let rest = stmt.rest(1 + len);
      if !rest.text.is_empty() {
        self.statement(rest)?;
      }
      return Ok(());
    }

    if let Some((name, value)) = split_assignment(stmt) {
      let address = self.eval(value.text).ok_or_else(|| {
        value.error(format!("cannot evaluate `{}`", value.text))
      })?;
      return self.define(name, address, SymbolKind::Constant, stmt.range);
    }

    let len = stmt.text.find(char::is_whitespace).unwrap_or(stmt.text.len());
    let word = &stmt.text[..len];
    let operand = stmt.rest(len);
    match word.to_ascii_uppercase().as_str() {
      "ORG" => {
        self.address = self.eval_required(operand)? as u32;
      }
      "EQUB" => {
        let len = self.data_len(operand, 1)?;
        self.emit_data(stmt, len)?;
      }
      "EQUW" => {
        let len = self.data_len(operand, 2)?;
        self.emit_data(stmt, len)?;
      }
      "EQUS" => {
        let len = self.data_len(operand, 1)?;
        self.emit_data(stmt, len)?;
      }
      "SKIP" => {
        let len = self.eval_required(operand)? as u32;
        self.emit_data(stmt, len)?;
      }
      "ALIGN" => {
        let align = self.eval_required(operand)? as u32;
        if align == 0 {
          return Err(operand.error("cannot align to 0".to_owned()));
        }
        let len = (align - self.address % align) % align;
        self.emit_data(stmt, len)?;
      }
      "CPU" | "SAVE" | "GUARD" | "CLEAR" | "PRINT" | "INCLUDE"
      | "COPYBLOCK" => {}
      _ => self.instruction(stmt, word, operand)?,
    }
    Ok(())
  }

  fn instruction(&mut self, stmt: Stmt, word: &str, operand: Stmt) -> Result<()> {
    let mnemonic = Mnemonic::from_name(word)
      .ok_or_else(|| stmt.error(format!("unknown mnemonic `{}`", word)))?;
    let value = self.operand(mnemonic, operand)?;
    let zero_page = match &value {
      Operand::Memory(_, expr) => self.is_zero_page(expr),
      _ => false,
    };
    if !accepts(mnemonic, &value, zero_page) {
      return Err(if operand.text.is_empty() {
        stmt.error(format!("missing operand for {}", mnemonic))
      } else {
        operand.error(format!(
          "invalid operand `{}` for {}",
          operand.text, mnemonic
        ))
      });
    }
    let size = self.size(mnemonic, &value);
    let address = self.current(stmt)?;
    self.advance(stmt, size as u32)?;
    self.instrs.push(Instr {
      address,
      mnemonic,
      operand: value,
      size,
      range: stmt.range,
    });
    Ok(())
  }

  fn operand(&self, mnemonic: Mnemonic, stmt: Stmt) -> Result<Operand> {
    let text = stmt.text;
    if text.is_empty() {
      return Ok(if mnemonic.has_accumulator_form() {
        Operand::Accumulator
      } else {
        Operand::Implied
      });
    }
    if text.eq_ignore_ascii_case("A") && mnemonic.has_accumulator_form() {
      return Ok(Operand::Accumulator);
    }
    if let Some(value) = text.strip_prefix('#') {
      return Ok(Operand::Immediate(expr(value.trim(), stmt)?));
    }

    let compact = if text.contains('\'') || text.contains('"') {
      text.to_owned()
    } else {
      text.split_whitespace().collect()
    };
    let upper = compact.to_ascii_uppercase();
    let (mode, inner) = if compact.starts_with('(') && upper.ends_with("),Y") {
      (Mode::IndirectIndexed, &compact[1..compact.len() - 3])
    } else if compact.starts_with('(') && upper.ends_with(",X)") {
      (Mode::IndexedIndirect, &compact[1..compact.len() - 3])
    } else if compact.starts_with('(') && compact.ends_with(')') {
      (Mode::Indirect, &compact[1..compact.len() - 1])
    } else if upper.ends_with(",X") {
      (Mode::IndexedX, &compact[..compact.len() - 2])
    } else if upper.ends_with(",Y") {
      (Mode::IndexedY, &compact[..compact.len() - 2])
    } else {
      (Mode::Direct, &compact[..])
    };
    Ok(Operand::Memory(mode, expr(inner, stmt)?))
  }

  fn size(&self, mnemonic: Mnemonic, operand: &Operand) -> u16 {
    match operand {
      Operand::Implied | Operand::Accumulator => 1,
      Operand::Immediate(_) => 2,
      Operand::Memory(mode, expr) => match mnemonic.class() {
        Class::BranchConditional => 2,
        Class::Jump if mnemonic == Mnemonic::Bra => 2,
        Class::Jump | Class::Call => 3,
        _ => match mode {
          Mode::Indirect | Mode::IndexedIndirect | Mode::IndirectIndexed => 2,
          // only LDX and STX have a zero page,Y form
          Mode::IndexedY
            if !matches!(mnemonic, Mnemonic::Ldx | Mnemonic::Stx) =>
          {
            3
          }
          _ if self.is_zero_page(expr) => 2,
          _ => 3,
        },
      },
    }
  }

  fn is_zero_page(&self, expr: &Expr) -> bool {
    let value = match expr {
      Expr::Number(n) => Some(*n),
      Expr::Symbol(name) => self.symbols.get(name).map(|sym| sym.address),
      Expr::Computed(text) => self.eval(text),
    };
    value.map_or(false, |value| value < 0x100)
  }

  fn data_len(&self, operand: Stmt, width: u32) -> Result<u32> {
    let mut len = 0;
    for item in split_items(operand.text) {
      if item.len() >= 2 && item.starts_with('"') && item.ends_with('"') {
        len += (item.len() - 2) as u32;
      } else if item.is_empty() {
        return Err(operand.error("empty data item".to_owned()));
      } else {
        len += width;
      }
    }
    Ok(len)
  }

  fn emit_data(&mut self, stmt: Stmt, len: u32) -> Result<()> {
    let address = self.current(stmt)?;
    self.advance(stmt, len)?;
    if len > 0 {
      self.data.push((address, len as u16));
    }
    Ok(())
  }

  fn current(&self, stmt: Stmt) -> Result<u16> {
    u16::try_from(self.address).map_err(|_| {
      stmt.error("assembly address overflows &FFFF".to_owned())
    })
  }

  fn advance(&mut self, stmt: Stmt, len: u32) -> Result<()> {
    if self.address + len > 0x10000 {
      return Err(stmt.error("assembly address overflows &FFFF".to_owned()));
    }
    self.address += len;
    Ok(())
  }

  fn define(
    &mut self,
    name: &str,
    address: u16,
    kind: SymbolKind,
    range: Range,
  ) -> Result<()> {
    match self.symbols.entry(name.to_owned()) {
      Entry::Occupied(entry) => {
        let existing = entry.get().address;
        if existing != address {
          return Err(MalformedProgramError::new(
            range,
            format!("`{}` is already bound to &{:04X}", name, existing),
          ));
        }
      }
      Entry::Vacant(entry) => {
        entry.insert(Symbol {
          address,
          kind,
          range,
        });
      }
    }
    Ok(())
  }

  fn eval_required(&self, stmt: Stmt) -> Result<u16> {
    self
      .eval(stmt.text)
      .ok_or_else(|| stmt.error(format!("cannot evaluate `{}`", stmt.text)))
  }

  /// Sums and differences of numbers and already bound names.
  fn eval(&self, text: &str) -> Option<u16> {
    let mut total = 0i64;
    for (sign, term) in split_terms(text) {
      let value = match parse_number(term) {
        Some(n) => n as i64,
        None if is_identifier(term) => self.symbols.get(term)?.address as i64,
        None => return None,
      };
      total += sign * value;
    }
    u16::try_from(total).ok()
  }

  fn finish(mut self) -> Result<Program> {
    self.instrs.sort_by_key(|instr| instr.address);
    for pair in self.instrs.windows(2) {
      if pair[0].next_address() > pair[1].address as u32 {
        return Err(MalformedProgramError::new(
          pair[1].range,
          format!(
            "instruction at &{:04X} overlaps the one at &{:04X}",
            pair[1].address, pair[0].address
          ),
        ));
      }
    }
    Ok(Program {
      instrs: self.instrs,
      symbols: self.symbols,
      data: self.data,
    })
  }
}

/// Which operand shapes a mnemonic can take.
fn accepts(mnemonic: Mnemonic, operand: &Operand, zero_page: bool) -> bool {
  use Mnemonic::*;
  match (mnemonic.class(), operand) {
    (_, Operand::Accumulator) => mnemonic.has_accumulator_form(),
    (Class::BranchConditional | Class::Call, operand) => {
      matches!(operand, Operand::Memory(Mode::Direct, _))
    }
    (Class::Jump, Operand::Memory(mode, _)) => match mnemonic {
      Jmp => matches!(
        mode,
        Mode::Direct | Mode::Indirect | Mode::IndexedIndirect
      ),
      _ => *mode == Mode::Direct,
    },
    (Class::Jump, _) => false,
    // BRK may carry a signature byte
    (Class::Return, Operand::Immediate(_)) => mnemonic == Brk,
    (
      Class::Return
      | Class::Transfer
      | Class::StackOp
      | Class::FlagOp
      | Class::Nop,
      operand,
    ) => *operand == Operand::Implied,
    (_, Operand::Implied) => matches!(mnemonic, Inx | Iny | Dex | Dey),
    (_, _) if matches!(mnemonic, Inx | Iny | Dex | Dey) => false,
    (Class::Store, Operand::Immediate(_)) => false,
    (Class::Arithmetic, Operand::Immediate(_)) => {
      matches!(mnemonic, Adc | Sbc | And | Ora | Eor)
    }
    (_, Operand::Memory(mode, _)) => accepts_mode(mnemonic, *mode, zero_page),
    _ => true,
  }
}

/// Memory addressing modes of the loads, stores, arithmetic and compares.
fn accepts_mode(mnemonic: Mnemonic, mode: Mode, zero_page: bool) -> bool {
  use Mnemonic::*;
  match mnemonic {
    Lda | Sta | Adc | Sbc | And | Ora | Eor | Cmp => match mode {
      Mode::Indirect | Mode::IndexedIndirect | Mode::IndirectIndexed => {
        zero_page
      }
      _ => true,
    },
    Ldx => matches!(mode, Mode::Direct | Mode::IndexedY),
    Ldy => matches!(mode, Mode::Direct | Mode::IndexedX),
    // zero page only when indexed
    Stx => mode == Mode::Direct || (mode == Mode::IndexedY && zero_page),
    Sty => mode == Mode::Direct || (mode == Mode::IndexedX && zero_page),
    Cpx | Cpy | Trb | Tsb => mode == Mode::Direct,
    _ => matches!(mode, Mode::Direct | Mode::IndexedX),
  }
}

fn expr(text: &str, stmt: Stmt) -> Result<Expr> {
  if text.is_empty() {
    return Err(stmt.error("missing operand".to_owned()));
  }
  if let Some(n) = parse_number(text) {
    return u16::try_from(n)
      .map(Expr::Number)
      .map_err(|_| stmt.error(format!("`{}` does not fit in 16 bits", text)));
  }
  if is_identifier(text) {
    Ok(Expr::Symbol(text.to_owned()))
  } else {
    Ok(Expr::Computed(text.to_owned()))
  }
}

fn parse_number(text: &str) -> Option<u32> {
  let (digits, radix) = if let Some(digits) =
    text.strip_prefix('&').or_else(|| text.strip_prefix('$'))
  {
    (digits, 16)
  } else if let Some(digits) = text.strip_prefix('%') {
    (digits, 2)
  } else if let Some(quoted) = text.strip_prefix('\'') {
    let mut chars = quoted.chars();
    return match (chars.next(), chars.next(), chars.next()) {
      (Some(c), Some('\''), None) => Some(c as u32),
      _ => None,
    };
  } else {
    (text, 10)
  };
  if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
    return None;
  }
  u32::from_str_radix(digits, radix).ok()
}

fn is_identifier(text: &str) -> bool {
  let mut chars = text.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name = value`
fn split_assignment(stmt: Stmt) -> Option<(&str, Stmt)> {
  let i = stmt.text.find('=')?;
  let name = stmt.text[..i].trim();
  if is_identifier(name) {
    Some((name, stmt.rest(i + 1)))
  } else {
    None
  }
}

fn split_terms(text: &str) -> Vec<(i64, &str)> {
  let mut terms = vec![];
  let mut sign = 1;
  let mut start = 0;
  let mut in_char = false;
  for (i, c) in text.char_indices() {
    match c {
      '\'' => in_char = !in_char,
      '+' | '-' if !in_char && !text[start..i].trim().is_empty() => {
        terms.push((sign, text[start..i].trim()));
        sign = if c == '+' { 1 } else { -1 };
        start = i + 1;
      }
      _ => {}
    }
  }
  terms.push((sign, text[start..].trim()));
  terms
}

/// Comma separated data items; commas inside strings do not split.
fn split_items(text: &str) -> Vec<&str> {
  let mut items = vec![];
  let mut start = 0;
  let mut in_string = false;
  for (i, c) in text.char_indices() {
    match c {
      '"' => in_string = !in_string,
      ',' if !in_string => {
        items.push(text[start..i].trim());
        start = i + 1;
      }
      _ => {}
    }
  }
  items.push(text[start..].trim());
  items
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn sizes(prog: &Program) -> Vec<(u16, u16)> {
    prog
      .instrs
      .iter()
      .map(|instr| (instr.address, instr.size))
      .collect()
  }

  #[test]
  fn addressing_modes() {
    let prog = parse(
      r#"
ptr = &19
      ORG &8F92
      LDA (ptr),Y
      LDA (ptr,X)
      LDA (ptr)
      STA &0400,X
      LDA table,Y
      ASL A
      LSR
      JMP (&020E)
      CMP #' '
.table
    "#,
    )
    .unwrap();
    let operands: Vec<_> =
      prog.instrs.iter().map(|i| i.operand.clone()).collect();
    assert_eq!(
      operands,
      vec![
        Operand::Memory(Mode::IndirectIndexed, Expr::Symbol("ptr".to_owned())),
        Operand::Memory(Mode::IndexedIndirect, Expr::Symbol("ptr".to_owned())),
        Operand::Memory(Mode::Indirect, Expr::Symbol("ptr".to_owned())),
        Operand::Memory(Mode::IndexedX, Expr::Number(0x0400)),
        Operand::Memory(Mode::IndexedY, Expr::Symbol("table".to_owned())),
        Operand::Accumulator,
        Operand::Accumulator,
        Operand::Memory(Mode::Indirect, Expr::Number(0x020e)),
        Operand::Immediate(Expr::Number(0x20)),
      ]
    );
  }

  #[test]
  fn sizes_follow_addressing_mode() {
    let prog = parse(
      r#"
zp = &70
      ORG &8000
.start
      LDA zp
      LDA zp,X
      LDA &1234
      LDX zp,Y
      LDA zp,Y
      BNE start
      JSR start
      INY
      LDA #1
      BRA start
    "#,
    )
    .unwrap();
    assert_eq!(
      sizes(&prog),
      vec![
        (0x8000, 2),
        (0x8002, 2),
        (0x8004, 3),
        (0x8007, 2),
        (0x8009, 3),
        (0x800c, 2),
        (0x800e, 3),
        (0x8011, 1),
        (0x8012, 2),
        (0x8014, 2),
      ]
    );
  }

  #[test]
  fn labels_comments_and_separators() {
    let prog = parse(
      r#"
      ORG &8000        \ start of ROM
.L8000 LDA #';'        ; a semicolon
.L8002: .alias: INY : RTS
OSWRCH = &FFEE
    "#,
    )
    .unwrap();
    assert_eq!(prog.instrs.len(), 3);
    assert_eq!(prog.labels_at(0x8002), vec!["L8002", "alias"]);
    assert_eq!(prog.symbols["L8000"].kind, SymbolKind::Label);
    assert_eq!(prog.symbols["OSWRCH"].address, 0xffee);
    assert_eq!(prog.symbols["OSWRCH"].kind, SymbolKind::Constant);
    assert_eq!(prog.instrs[0].operand, Operand::Immediate(Expr::Number(59)));
    assert_eq!(prog.instrs[2].address, 0x8003);
  }

  #[test]
  fn data_directives_advance_address() {
    let prog = parse(
      r#"
      ORG &8000
      RTS
      EQUS "a,b", 13
      EQUW &1234, &5678
      EQUB 0
      SKIP 2
      ALIGN 4
.after
      NOP
    "#,
    )
    .unwrap();
    assert_eq!(prog.symbols["after"].address, 0x800c);
    assert_eq!(
      prog.data,
      vec![(0x8001, 4), (0x8005, 4), (0x8009, 1), (0x800a, 2)]
    );
  }

  #[test]
  fn constants_can_be_used_before_definition() {
    let prog = parse(
      r#"
      ORG &8000
      LDA early
      LDA late+1
early = &70
late = early+2
    "#,
    )
    .unwrap();
    assert_eq!(sizes(&prog), vec![(0x8000, 2), (0x8002, 2)]);
    assert_eq!(
      prog.instrs[1].operand,
      Operand::Memory(Mode::Direct, Expr::Computed("late+1".to_owned()))
    );
  }

  #[test]
  fn duplicate_label_at_other_address() {
    let err = parse(
      r#"
      ORG &8000
.loop
      NOP
.loop
      RTS
    "#,
    )
    .unwrap_err();
    assert_eq!(err.message, "`loop` is already bound to &8000");
  }

  #[test]
  fn alias_at_same_address_is_fine() {
    let prog = parse(
      r#"
      ORG &8000
.entry
entry = &8000
      RTS
    "#,
    )
    .unwrap();
    assert_eq!(prog.labels_at(0x8000), vec!["entry"]);
  }

  #[test]
  fn unknown_mnemonic() {
    let input = "ORG &8000\n  LDQ #1\n";
    let err = parse(input).unwrap_err();
    assert_eq!(err.message, "unknown mnemonic `LDQ`");
    assert_eq!(&input[err.range.start..err.range.end], "LDQ #1");
  }

  #[test]
  fn invalid_operands() {
    let err = parse("ORG &8000\nLDA\n").unwrap_err();
    assert_eq!(err.message, "missing operand for LDA");
    let err = parse("ORG &8000\nSTA #1\n").unwrap_err();
    assert_eq!(err.message, "invalid operand `#1` for STA");
    let err = parse("ORG &8000\nRTS &10\n").unwrap_err();
    assert_eq!(err.message, "invalid operand `&10` for RTS");
    let err = parse("ORG &8000\nJSR (&10)\n").unwrap_err();
    assert_eq!(err.message, "invalid operand `(&10)` for JSR");
    let err = parse("ORG &8000\nJMP &12345\n").unwrap_err();
    assert_eq!(err.message, "`&12345` does not fit in 16 bits");
  }

  #[test]
  fn modes_the_cpu_lacks() {
    let invalid = [
      ("LDX &70,X", "invalid operand `&70,X` for LDX"),
      ("LDY &1234,Y", "invalid operand `&1234,Y` for LDY"),
      ("STX &1234,Y", "invalid operand `&1234,Y` for STX"),
      ("STY &1234,X", "invalid operand `&1234,X` for STY"),
      ("CPX &70,X", "invalid operand `&70,X` for CPX"),
      ("INC &70,Y", "invalid operand `&70,Y` for INC"),
      ("LDA (&1234),Y", "invalid operand `(&1234),Y` for LDA"),
      ("LDX (&70),Y", "invalid operand `(&70),Y` for LDX"),
    ];
    for (line, message) in invalid {
      let err = parse(&format!("ORG &8000\n{}\n", line)).unwrap_err();
      assert_eq!(err.message, message, "{}", line);
    }

    let prog = parse(
      r#"
      ORG &8000
      LDX &1234,Y
      LDY &70,X
      STX &70,Y
      STY &70,X
      STZ &1234,X
      CPY &70
      BIT &70,X
      ROR &1234,X
    "#,
    )
    .unwrap();
    assert_eq!(prog.instrs.len(), 8);
  }

  #[test]
  fn overlapping_instructions() {
    let err = parse(
      r#"
      ORG &8000
      LDA &1234
      ORG &8001
      RTS
    "#,
    )
    .unwrap_err();
    assert_eq!(
      err.message,
      "instruction at &8001 overlaps the one at &8000"
    );
  }

  #[test]
  fn instructions_are_sorted_by_address() {
    let prog = parse(
      r#"
      ORG &9000
      RTS
      ORG &8000
      NOP
    "#,
    )
    .unwrap();
    assert_eq!(sizes(&prog), vec![(0x8000, 1), (0x9000, 1)]);
  }

  #[test]
  fn numbers() {
    assert_eq!(parse_number("&FF"), Some(255));
    assert_eq!(parse_number("$1f"), Some(31));
    assert_eq!(parse_number("%101"), Some(5));
    assert_eq!(parse_number("42"), Some(42));
    assert_eq!(parse_number("'A'"), Some(65));
    assert_eq!(parse_number("&"), None);
    assert_eq!(parse_number("&XY"), None);
    assert_eq!(parse_number("label"), None);
  }
}
