/*!
  Structures and functions for the execution engine: fetch, decode, execute,
  interrupt dispatch, and fault delivery.

  The machine owns all mutable state — memory, registers, stack, program
  counter — and is the only thing that touches it. One instruction fully
  completes before the next fetch. Faults never unwind: every instruction
  returns `Result<(), Fault>` and the run loop translates a fault into the
  three diagnostic registers before delivering the error interrupt, after
  which the machine is terminally halted.
*/

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use prettytable::{format as TableFormat, row, table, Table};

use crate::fault::Fault;
use crate::isa::{Cell, Opcode, Register, DEFAULT_ENCODED_LEN, MEMORY_SIZE, REGISTER_COUNT, STACK_SIZE};
use crate::ports::{BlockDevice, DisplayMode, DisplayPort, InputPort, MemBlockDevice, NullDisplay, NullInput};

/// Pixel footprint of one text-mode character cell.
const TEXT_CELL_WIDTH: u32 = 10;
const TEXT_CELL_HEIGHT: u32 = 16;

/// Visual refresh period; presentation is decoupled from instruction throughput.
const FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Interrupt codes of the service table.
mod int_code {
  use crate::isa::Cell;

  pub const PRINT_CHAR: Cell = 0x00;
  pub const PRINT_INT: Cell = 0x01;
  pub const DISPLAY_INIT: Cell = 0x70;
  pub const SET_PIXEL: Cell = 0x71;
  pub const DRAW_CHAR: Cell = 0x72;
  pub const BLOCK_READ: Cell = 0x80;
  pub const BLOCK_WRITE: Cell = 0x81;
  pub const KEY_POLL: Cell = 0xF6;
  pub const ERROR: Cell = 0xFE;
  pub const HALT: Cell = 0xFF;
}

/// Block-device validation error codes, delivered in register A via 0xFE.
mod block_error {
  use crate::isa::Cell;

  pub const INVALID_DRIVE: Cell = 0x81;
  pub const INVALID_SECTOR: Cell = 0x82;
  pub const INVALID_OFFSET: Cell = 0x83;
  pub const DEVICE_ABSENT: Cell = 0x84;
  pub const TRANSFER_FAILED: Cell = 0x85;
}

/// Display geometry configured by the display-init interrupt.
#[derive(Clone, Copy, Debug)]
struct DisplayConfig {
  mode: DisplayMode,
  width: u32,
  height: u32,
  /// Text-mode character grid; zero in pixel mode.
  columns: u32,
  rows: u32,
}

/// One fetched instruction: its address, opcode cell, and operand cells.
#[derive(Clone, Copy, Debug)]
struct Fetched {
  address: usize,
  opcode_cell: Cell,
  operands: [Cell; 3],
}

pub struct Machine {
  // Memory stores
  memory: Vec<Cell>,
  stack: Vec<Cell>,

  // Cursors
  pc: usize,
  sp: usize, // starts at STACK_SIZE, grows downward

  registers: [Cell; REGISTER_COUNT],
  cycles: u64,
  running: bool,

  // Interrupt-service state
  display: Option<DisplayConfig>,
  last_key: Option<u32>,

  // Peripheral ports
  display_port: Box<dyn DisplayPort>,
  input_port: Box<dyn InputPort>,
  block_device: Box<dyn BlockDevice>,
}

impl Machine {
  // region Construction and accessors

  pub fn new(
    display_port: Box<dyn DisplayPort>,
    input_port: Box<dyn InputPort>,
    block_device: Box<dyn BlockDevice>,
  ) -> Machine {
    Machine {
      memory: vec![0; MEMORY_SIZE],
      stack: vec![0; STACK_SIZE],
      pc: 0,
      sp: STACK_SIZE,
      registers: [0; REGISTER_COUNT],
      cycles: 0,
      running: true,
      display: None,
      last_key: None,
      display_port,
      input_port,
      block_device,
    }
  }

  /// A machine with no display, no keyboard, and no disk files.
  pub fn headless() -> Machine {
    Machine::new(
      Box::new(NullDisplay),
      Box::new(NullInput),
      Box::new(MemBlockDevice::new(0)),
    )
  }

  /// Loads the encoded program into memory starting at address 0.
  pub fn load_program(&mut self, program: &[Cell]) {
    self.memory[..program.len()].copy_from_slice(program);
  }

  pub fn register(&self, register: Register) -> Cell {
    self.registers[register.code() as usize]
  }

  pub fn set_register(&mut self, register: Register, value: Cell) {
    self.registers[register.code() as usize] = value;
  }

  pub fn pc(&self) -> usize {
    self.pc
  }

  pub fn sp(&self) -> usize {
    self.sp
  }

  pub fn cycles(&self) -> u64 {
    self.cycles
  }

  pub fn is_running(&self) -> bool {
    self.running
  }

  pub fn memory_cell(&self, address: usize) -> Cell {
    self.memory[address]
  }

  // endregion

  // region Low-level operand helpers

  fn operand_register(&self, cell: Cell) -> Result<Register, Fault> {
    Register::from_cell(cell).ok_or(Fault::InvalidRegister(cell))
  }

  fn data_address(&self, cell: Cell) -> Result<usize, Fault> {
    match usize::try_from(cell) {
      Ok(address) if address < MEMORY_SIZE => Ok(address),
      _ => Err(Fault::AddressOutOfRange(cell)),
    }
  }

  fn jump_target(&self, cell: Cell) -> Result<usize, Fault> {
    match usize::try_from(cell) {
      Ok(target) if target < MEMORY_SIZE => Ok(target),
      _ => Err(Fault::InvalidBranchTarget(cell)),
    }
  }

  fn push(&mut self, value: Cell) -> Result<(), Fault> {
    if self.sp == 0 {
      return Err(Fault::StackOverflow);
    }
    self.sp -= 1;
    self.stack[self.sp] = value;
    Ok(())
  }

  fn pop(&mut self) -> Result<Cell, Fault> {
    if self.sp >= STACK_SIZE {
      return Err(Fault::StackUnderflow);
    }
    let value = self.stack[self.sp];
    self.stack[self.sp] = 0;
    self.sp += 1;
    Ok(value)
  }

  // endregion

  // region Fetch/decode/execute

  /**
    Fetches the instruction at PC and advances PC past it. Cells that do not
    decode to an opcode still consume the default length so the faulting
    opcode value reaches the error interrupt with PC already advanced.
    Returns `None` once PC runs off the end of memory, halting the machine.
  */
  fn fetch(&mut self) -> Option<Fetched> {
    if self.pc >= MEMORY_SIZE {
      self.running = false;
      return None;
    }

    let address = self.pc;
    let opcode_cell = self.memory[address];
    let length = u8::try_from(opcode_cell)
      .ok()
      .and_then(|byte| Opcode::try_from(byte).ok())
      .map(|opcode| opcode.encoded_len())
      .unwrap_or(DEFAULT_ENCODED_LEN);

    // Pad with zeros when the instruction is truncated at the memory boundary.
    let mut operands = [0; 3];
    for (i, slot) in operands.iter_mut().enumerate().take(length - 1) {
      *slot = self.memory.get(address + 1 + i).copied().unwrap_or(0);
    }

    self.pc = address + length;
    Some(Fetched {
      address,
      opcode_cell,
      operands,
    })
  }

  fn execute(&mut self, fetched: &Fetched) -> Result<(), Fault> {
    self.cycles += 1;

    let byte = u8::try_from(fetched.opcode_cell)
      .map_err(|_| Fault::MalformedInstruction(fetched.opcode_cell))?;
    let opcode = Opcode::try_from(byte).map_err(|_| Fault::InvalidOpcode(byte))?;
    let [op1, op2, op3] = fetched.operands;

    #[cfg(feature = "trace_execution")]
    println!(
      "{:>6}  {:#04X}  {} {:?}",
      self.cycles, fetched.address, opcode, fetched.operands
    );
    log::trace!(
      "cycle {} at {:#04X}: {} {:?}",
      self.cycles,
      fetched.address,
      opcode,
      fetched.operands
    );

    match opcode {
      Opcode::Halt => {
        self.running = false;
      }

      Opcode::Ldw => {
        let register = self.operand_register(op1)?;
        self.set_register(register, op2);
      }

      Opcode::Mov => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        self.set_register(dst, self.register(src));
      }

      Opcode::Add => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        self.set_register(dst, self.register(dst).wrapping_add(self.register(src)));
      }

      Opcode::Sub => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        self.set_register(dst, self.register(dst).wrapping_sub(self.register(src)));
      }

      Opcode::Mul => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        self.set_register(dst, self.register(dst).wrapping_mul(self.register(src)));
      }

      Opcode::Div => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        let divisor = self.register(src);
        if divisor == 0 {
          return Err(Fault::DivisionByZero);
        }
        // True division: the quotient is computed exactly and rounded to the
        // nearest integer cell, not truncated.
        let quotient = self.register(dst) as f64 / divisor as f64;
        self.set_register(dst, quotient.round() as Cell);
      }

      Opcode::Xor => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        self.set_register(dst, self.register(dst) ^ self.register(src));
      }

      Opcode::And => {
        let dst = self.operand_register(op1)?;
        let src = self.operand_register(op2)?;
        self.set_register(dst, self.register(dst) & self.register(src));
      }

      Opcode::Str => {
        let register = self.operand_register(op1)?;
        let address = self.data_address(op2)?;
        self.memory[address] = self.register(register);
      }

      Opcode::Ldr => {
        let register = self.operand_register(op1)?;
        let address = self.data_address(op2)?;
        self.set_register(register, self.memory[address]);
      }

      Opcode::Bne => {
        let r1 = self.operand_register(op1)?;
        let r2 = self.operand_register(op2)?;
        if self.register(r1) != self.register(r2) {
          self.pc = self.jump_target(op3)?;
        }
      }

      Opcode::Beq => {
        let r1 = self.operand_register(op1)?;
        let r2 = self.operand_register(op2)?;
        if self.register(r1) == self.register(r2) {
          self.pc = self.jump_target(op3)?;
        }
      }

      Opcode::Blt => {
        let r1 = self.operand_register(op1)?;
        let r2 = self.operand_register(op2)?;
        if self.register(r1) < self.register(r2) {
          self.pc = self.jump_target(op3)?;
        }
      }

      Opcode::Jmp => {
        self.pc = self.jump_target(op1)?;
      }

      Opcode::Jsr => {
        // PC has already advanced, so this is the instruction after the call.
        self.push(self.pc as Cell)?;
        self.pc = self.jump_target(op1)?;
      }

      Opcode::Ret => {
        let return_address = self.pop()?;
        self.pc = self.jump_target(return_address)?;
      }

      Opcode::Push => {
        let register = self.operand_register(op1)?;
        self.push(self.register(register))?;
      }

      Opcode::Pop => {
        let register = self.operand_register(op1)?;
        let value = self.pop()?;
        self.set_register(register, value);
      }

      Opcode::Int => {
        self.service_interrupt(op1)?;
      }
    }

    Ok(())
  }

  // endregion

  // region Interrupt service table

  fn service_interrupt(&mut self, code: Cell) -> Result<(), Fault> {
    match code {
      int_code::PRINT_CHAR => {
        let value = self.register(Register::A);
        let ch = u32::try_from(value)
          .ok()
          .and_then(char::from_u32)
          .ok_or(Fault::InvalidCharacter(value))?;
        print!("{}", ch);
      }

      int_code::PRINT_INT => {
        println!("{}", self.register(Register::A));
      }

      int_code::DISPLAY_INIT => self.display_init()?,
      int_code::SET_PIXEL => self.set_pixel()?,
      int_code::DRAW_CHAR => self.draw_char()?,

      int_code::KEY_POLL => self.key_poll(),

      int_code::BLOCK_READ => self.block_read()?,
      int_code::BLOCK_WRITE => self.block_write()?,

      int_code::ERROR => self.error_interrupt(),

      int_code::HALT => {
        self.running = false;
      }

      _ => return Err(Fault::UnknownInterrupt(code)),
    }
    Ok(())
  }

  /**
    The universal fault sink. Reports the three diagnostic registers and
    halts. The run loop routes here for faults; the block-device handlers call
    it directly on validation failure.
  */
  fn error_interrupt(&mut self) {
    println!("Error interrupt");
    println!("Register A: {}", self.register(Register::A));
    println!("Register B: {}", self.register(Register::B));
    println!("Register C: {}", self.register(Register::C));
    self.running = false;
  }

  fn display_init(&mut self) -> Result<(), Fault> {
    let mode_cell = self.register(Register::A);
    let width_cell = self.register(Register::B);
    let height_cell = self.register(Register::C);

    let mode = u8::try_from(mode_cell)
      .ok()
      .and_then(|b| DisplayMode::try_from(b).ok())
      .ok_or(Fault::InvalidDisplayMode(mode_cell))?;
    let (width, height) = match (u32::try_from(width_cell), u32::try_from(height_cell)) {
      (Ok(w), Ok(h)) => (w, h),
      _ => return Err(Fault::InvalidResolution(width_cell, height_cell)),
    };

    self.display = Some(DisplayConfig {
      mode,
      width,
      height,
      columns: width / TEXT_CELL_WIDTH,
      rows: height / TEXT_CELL_HEIGHT,
    });
    self.display_port.init(mode, width, height);
    Ok(())
  }

  fn set_pixel(&mut self) -> Result<(), Fault> {
    let config = match self.display {
      Some(config) if config.mode == DisplayMode::Pixel => config,
      _ => return Ok(()), // no surface or wrong mode: ignored
    };

    let color = self.register(Register::A);
    let x = self.register(Register::B);
    let y = self.register(Register::C);

    match (u32::try_from(x), u32::try_from(y)) {
      (Ok(px), Ok(py)) if px < config.width && py < config.height => {
        self
          .display_port
          .set_pixel(px, py, (color & 0xFF_FFFF) as u32);
        Ok(())
      }
      _ => Err(Fault::PixelOutOfBounds(x, y)),
    }
  }

  fn draw_char(&mut self) -> Result<(), Fault> {
    let config = match self.display {
      Some(config) if config.mode == DisplayMode::Text => config,
      _ => return Ok(()),
    };
    let total_cells = config.columns * config.rows;
    if total_cells == 0 {
      return Ok(());
    }

    let ch = (self.register(Register::A) & 0xFF) as u8;
    let color = (self.register(Register::C) & 0xFF_FFFF) as u32;
    // Out-of-range cursor positions clamp to the last cell.
    let index = u32::try_from(self.register(Register::B))
      .unwrap_or(0)
      .min(total_cells - 1);

    self.display_port.draw_char(index, ch, color);
    self.display_port.present();
    Ok(())
  }

  fn key_poll(&mut self) {
    let keys = self.input_port.pressed_keycodes();
    match keys.iter().min().copied() {
      Some(key) => {
        // Only one simultaneous key is ever reported: the lowest keycode.
        let is_new = self.last_key != Some(key);
        self.set_register(Register::A, key as Cell);
        self.set_register(Register::B, is_new as Cell);
        self.last_key = Some(key);
      }
      None => {
        self.set_register(Register::A, 0);
        self.set_register(Register::B, 0);
        self.last_key = None;
      }
    }
  }

  /// Delivers a block-device validation error code through the error interrupt.
  fn block_fault(&mut self, code: Cell) {
    self.set_register(Register::A, code);
    self.set_register(Register::B, self.pc as Cell);
    self.set_register(Register::C, 0);
    self.error_interrupt();
  }

  /// Validates drive/sector/offset, returning them only if all are in range.
  fn block_geometry(&mut self) -> Option<(u8, u8, u8)> {
    let drive = self.register(Register::A);
    let sector = self.register(Register::B);
    let offset = self.register(Register::C);

    if !(0..=9).contains(&drive) {
      self.block_fault(block_error::INVALID_DRIVE);
      return None;
    }
    if !(0..=15).contains(&sector) {
      self.block_fault(block_error::INVALID_SECTOR);
      return None;
    }
    if !(0..=254).contains(&offset) {
      self.block_fault(block_error::INVALID_OFFSET);
      return None;
    }
    Some((drive as u8, sector as u8, offset as u8))
  }

  fn block_read(&mut self) -> Result<(), Fault> {
    let (drive, sector, offset) = match self.block_geometry() {
      Some(geometry) => geometry,
      None => return Ok(()), // fault already delivered
    };
    if !self.block_device.exists(drive) {
      self.block_fault(block_error::DEVICE_ABSENT);
      return Ok(());
    }
    match self.block_device.read_byte(drive, sector, offset) {
      Ok(byte) => {
        self.set_register(Register::E, byte as Cell);
        Ok(())
      }
      Err(error) => {
        log::debug!("block read failed on drive {}: {}", drive, error);
        self.block_fault(block_error::TRANSFER_FAILED);
        Ok(())
      }
    }
  }

  fn block_write(&mut self) -> Result<(), Fault> {
    let (drive, sector, offset) = match self.block_geometry() {
      Some(geometry) => geometry,
      None => return Ok(()),
    };
    if !self.block_device.exists(drive) {
      self.block_fault(block_error::DEVICE_ABSENT);
      return Ok(());
    }
    let value_cell = self.register(Register::D);
    let value = u8::try_from(value_cell).map_err(|_| Fault::InvalidByteValue(value_cell))?;
    match self.block_device.write_byte(drive, sector, offset, value) {
      Ok(()) => Ok(()),
      Err(error) => {
        log::debug!("block write failed on drive {}: {}", drive, error);
        self.block_fault(block_error::TRANSFER_FAILED);
        Ok(())
      }
    }
  }

  // endregion

  // region Run loop and fault delivery

  /**
    Converts a fault into the uniform error-interrupt delivery: A holds the
    category code, B holds PC (already advanced past the faulting
    instruction), C holds the faulting opcode cell.
  */
  fn deliver_fault(&mut self, fault: Fault, opcode_cell: Cell) {
    log::debug!("fault at {:#04X}: {}", self.pc, fault);
    self.set_register(Register::A, fault.category());
    self.set_register(Register::B, self.pc as Cell);
    self.set_register(Register::C, opcode_cell);
    self.error_interrupt();
  }

  /// Fetches and executes one instruction, delivering any fault.
  pub fn step(&mut self) {
    if !self.running {
      return;
    }
    let fetched = match self.fetch() {
      Some(fetched) => fetched,
      None => return,
    };
    if let Err(fault) = self.execute(&fetched) {
      self.deliver_fault(fault, fetched.opcode_cell);
    }
  }

  /**
    Runs until the machine halts. While a display is configured, presentation
    is throttled to one `present()` per 1/60 s of accumulated wall-clock time,
    and the quit signal is sampled once per iteration; a quit still lets the
    in-flight instruction complete.
  */
  pub fn run(&mut self) {
    let mut frame_timer = Duration::ZERO;
    while self.running {
      let iteration_start = Instant::now();

      if self.display.is_some() {
        if frame_timer >= FRAME_INTERVAL {
          self.display_port.present();
          frame_timer = Duration::ZERO;
        }
        if self.display_port.poll_quit() {
          self.running = false;
        }
      }

      self.step();
      frame_timer += iteration_start.elapsed();
    }
    log::debug!("halted after {} cycle(s)", self.cycles);
  }

  // endregion

  // region State dump

  fn make_register_table(names: &[String], cells: &[Cell], highlight: usize) -> Table {
    let mut table = Table::new();
    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Name", ubl->"Contents"]);

    for (i, cell) in cells.iter().enumerate() {
      match i == highlight {
        true => {
          table.add_row(row![r->format!("* --> {} =", names[i]), format!("{:#04X}", cell)]);
        }
        false => {
          table.add_row(row![r->format!("{} =", names[i]), format!("{:#04X}", cell)]);
        }
      }
    }
    table
  }

  // endregion
}

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl Display for Machine {
  /// Registers and stack as tables, then cycle count and a hex memory listing.
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let register_names: Vec<String> = ["A", "B", "C", "D", "E", "F"]
      .iter()
      .map(|n| n.to_string())
      .collect();
    let stack_names: Vec<String> = (0..STACK_SIZE).map(|i| format!("S[{}]", i)).collect();

    let register_table =
      Machine::make_register_table(&register_names, &self.registers, usize::MAX);
    let stack_table = Machine::make_register_table(&stack_names, &self.stack, self.sp);

    let mut combined_table = table!([register_table, stack_table]);
    combined_table.set_titles(row![ub->"Registers", ub->"Stack"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    write!(f, "{}", combined_table)?;
    writeln!(f, "Total cycles: {}", self.cycles)?;
    writeln!(f, "\nMemory:")?;
    for base in (0..MEMORY_SIZE).step_by(16) {
      write!(f, "0x{:04X}: ", base)?;
      for cell in &self.memory[base..base + 16] {
        write!(f, "{:02X} ", cell)?;
      }
      writeln!(f)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use super::*;
  use crate::assembler::assemble;

  fn run_source(source: &str) -> Machine {
    let assembly = assemble(source).expect("assemble");
    let mut machine = Machine::headless();
    machine.load_program(&assembly.cells);
    machine.run();
    machine
  }

  fn run_cells(cells: &[Cell]) -> Machine {
    let mut machine = Machine::headless();
    machine.load_program(cells);
    machine.run();
    machine
  }

  #[test]
  fn a_fresh_machine_is_zeroed() {
    let machine = Machine::headless();
    assert_eq!(machine.pc(), 0);
    assert_eq!(machine.sp(), STACK_SIZE);
    assert_eq!(machine.register(Register::A), 0);
    assert!(machine.is_running());
  }

  #[test]
  fn zeroed_memory_halts_immediately() {
    let machine = run_cells(&[]);
    assert!(!machine.is_running());
    assert_eq!(machine.cycles(), 1); // one HALT fetched from zeroed memory
    assert_eq!(machine.register(Register::A), 0);
  }

  #[test]
  fn arithmetic_and_moves() {
    let machine = run_source(
      "ldw a, 7\n\
       ldw b, 5\n\
       mov c, a\n\
       add c, b\n\
       sub a, b\n\
       mul b, b\n\
       int 0xFF\n",
    );
    assert_eq!(machine.register(Register::C), 12);
    assert_eq!(machine.register(Register::A), 2);
    assert_eq!(machine.register(Register::B), 25);
  }

  #[test]
  fn bitwise_operations() {
    let machine = run_source(
      "ldw a, 12\n\
       ldw b, 10\n\
       xor a, b\n\
       ldw c, 12\n\
       and c, b\n\
       int 0xFF\n",
    );
    assert_eq!(machine.register(Register::A), 12 ^ 10);
    assert_eq!(machine.register(Register::C), 12 & 10);
  }

  #[test]
  fn large_immediates_occupy_one_cell() {
    let machine = run_source("ldw a, 0xFFFFFF\nint 0xFF\n");
    assert_eq!(machine.register(Register::A), 0xFF_FFFF);
  }

  #[test]
  fn str_and_ldr_round_trip_through_memory() {
    let machine = run_source(
      "ldw a, 99\n\
       str a, 0xF0\n\
       ldr b, 0xF0\n\
       int 0xFF\n",
    );
    assert_eq!(machine.memory_cell(0xF0), 99);
    assert_eq!(machine.register(Register::B), 99);
  }

  #[test]
  fn taken_branch_skips_unreachable_code() {
    // The §8-style scenario: equal registers take the branch, the unreachable
    // block never runs, and the machine halts with no fault registers set.
    let machine = run_source(
      "ldw a, 5\n\
       ldw b, 5\n\
       beq a, b, done\n\
       ldw c, 1\n\
       done:\n\
       int 0xFF\n",
    );
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::C), 0); // unreachable block skipped
    assert_eq!(machine.register(Register::A), 5); // no fault overwrote A
  }

  #[test]
  fn non_taken_branch_falls_through() {
    let machine = run_source(
      "ldw a, 1\n\
       ldw b, 2\n\
       beq a, b, skip\n\
       ldw c, 42\n\
       skip:\n\
       int 0xFF\n",
    );
    assert_eq!(machine.register(Register::C), 42);
  }

  #[test]
  fn blt_compares_signed_less_than() {
    let machine = run_source(
      "ldw a, 3\n\
       ldw b, 9\n\
       blt a, b, less\n\
       ldw c, 1\n\
       less:\n\
       int 0xFF\n",
    );
    assert_eq!(machine.register(Register::C), 0);
  }

  #[test]
  fn jsr_pushes_the_advanced_pc_and_ret_returns() {
    let machine = run_source(
      "jsr sub1\n\
       ldw b, 2\n\
       int 0xFF\n\
       sub1:\n\
       ldw a, 1\n\
       ret\n",
    );
    assert_eq!(machine.register(Register::A), 1);
    assert_eq!(machine.register(Register::B), 2); // returned to the call's successor
    assert_eq!(machine.sp(), STACK_SIZE);
  }

  #[test]
  fn push_pop_restores_sp() {
    let machine = run_source(
      "ldw a, 10\n\
       ldw b, 20\n\
       push a\n\
       push b\n\
       pop c\n\
       pop d\n\
       int 0xFF\n",
    );
    assert_eq!(machine.register(Register::C), 20); // LIFO
    assert_eq!(machine.register(Register::D), 10);
    assert_eq!(machine.sp(), STACK_SIZE);
  }

  #[test]
  fn pushing_past_the_stack_faults_with_category_3() {
    // 33 pushes: one more than the stack holds. Encoded by hand because the
    // checker would flag the imbalance (a warning) but not stop assembly.
    let mut cells = vec![];
    for _ in 0..33 {
      cells.extend_from_slice(&[0x0B, 0x00, 0]); // push a
    }
    let machine = run_cells(&cells);
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 3);
    assert_eq!(machine.register(Register::C), 0x0B);
  }

  #[test]
  fn push_with_full_stack_leaves_machine_halted() {
    let mut machine = Machine::headless();
    machine.load_program(&[0x0B, 0x00, 0]);
    // Exhaust the stack first.
    for _ in 0..STACK_SIZE {
      machine.push(0).unwrap();
    }
    machine.step();
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 3);
  }

  #[test]
  fn popping_an_empty_stack_faults_with_category_3() {
    let machine = run_cells(&[0x0C, 0x00, 0]); // pop a
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 3);
    assert_eq!(machine.register(Register::B), 3); // PC advanced past the pop
    assert_eq!(machine.register(Register::C), 0x0C);
  }

  #[test]
  fn division_is_true_division() {
    let machine = run_source(
      "ldw a, 7\n\
       ldw b, 2\n\
       div a, b\n\
       int 0xFF\n",
    );
    // 7 / 2 = 3.5, rounded to nearest, not truncated.
    assert_eq!(machine.register(Register::A), 4);
  }

  #[test]
  fn division_by_zero_faults_with_category_4() {
    let machine = run_source(
      "ldw a, 10\n\
       ldw b, 0\n\
       div a, b\n\
       int 0xFF\n",
    );
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 4);
    assert_eq!(machine.register(Register::C), 0x13);
  }

  #[test]
  fn invalid_opcode_faults_with_category_1() {
    let machine = run_cells(&[0x07, 0, 0]); // reserved opcode
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 1);
    assert_eq!(machine.register(Register::B), 3);
    assert_eq!(machine.register(Register::C), 0x07);
  }

  #[test]
  fn oversized_opcode_cell_faults_with_category_2() {
    let machine = run_cells(&[700, 0, 0]);
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 2);
    assert_eq!(machine.register(Register::C), 700);
  }

  #[test]
  fn invalid_register_code_faults_with_category_1() {
    let machine = run_cells(&[0x01, 9, 5]); // ldw into register 9
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 1);
  }

  #[test]
  fn branch_target_outside_memory_faults() {
    let machine = run_cells(&[0x11, 999, 0]); // jmp 999
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 1);
  }

  #[test]
  fn unknown_interrupt_faults_with_category_1() {
    let machine = run_source("int 0x42\n");
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 1);
    assert_eq!(machine.register(Register::C), 0x0A);
  }

  #[test]
  fn halt_interrupt_is_silent_and_terminal() {
    let mut machine = Machine::headless();
    let assembly = assemble("int 0xFF\nldw a, 9\n").expect("assemble");
    machine.load_program(&assembly.cells);
    machine.run();
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 0); // nothing ran after halt
    machine.step(); // stepping a halted machine is a no-op
    assert_eq!(machine.cycles(), 1);
  }

  #[test]
  fn invalid_display_mode_faults() {
    let machine = run_source(
      "ldw a, 2\n\
       ldw b, 100\n\
       ldw c, 100\n\
       int 0x70\n",
    );
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 1);
  }

  // A display port that records what reaches it.
  #[derive(Default)]
  struct RecordingDisplay {
    pixels: Rc<RefCell<Vec<(u32, u32, u32)>>>,
    chars: Rc<RefCell<Vec<(u32, u8, u32)>>>,
    presents: Rc<RefCell<usize>>,
  }

  impl DisplayPort for RecordingDisplay {
    fn init(&mut self, _mode: DisplayMode, _width: u32, _height: u32) {}
    fn set_pixel(&mut self, x: u32, y: u32, color: u32) {
      self.pixels.borrow_mut().push((x, y, color));
    }
    fn draw_char(&mut self, cell_index: u32, ch: u8, color: u32) {
      self.chars.borrow_mut().push((cell_index, ch, color));
    }
    fn present(&mut self) {
      *self.presents.borrow_mut() += 1;
    }
  }

  #[test]
  fn set_pixel_reaches_the_display_port_in_bounds() {
    let display = RecordingDisplay::default();
    let pixels = Rc::clone(&display.pixels);
    let mut machine = Machine::new(
      Box::new(display),
      Box::new(NullInput),
      Box::new(MemBlockDevice::new(0)),
    );
    let assembly = assemble(
      "ldw a, 0\n\
       ldw b, 64\n\
       ldw c, 48\n\
       int 0x70\n\
       ldw a, 0xFF0000\n\
       ldw b, 10\n\
       ldw c, 20\n\
       int 0x71\n\
       int 0xFF\n",
    )
    .expect("assemble");
    machine.load_program(&assembly.cells);
    machine.run();
    assert_eq!(pixels.borrow().as_slice(), &[(10, 20, 0xFF0000)]);
  }

  #[test]
  fn out_of_bounds_pixel_faults() {
    let machine = run_with_display(
      "ldw a, 0\n\
       ldw b, 64\n\
       ldw c, 48\n\
       int 0x70\n\
       ldw a, 0xFF0000\n\
       ldw b, 64\n\
       ldw c, 0\n\
       int 0x71\n\
       int 0xFF\n",
    );
    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 1);
  }

  fn run_with_display(source: &str) -> Machine {
    let mut machine = Machine::new(
      Box::new(RecordingDisplay::default()),
      Box::new(NullInput),
      Box::new(MemBlockDevice::new(0)),
    );
    let assembly = assemble(source).expect("assemble");
    machine.load_program(&assembly.cells);
    machine.run();
    machine
  }

  #[test]
  fn draw_char_clamps_to_the_last_cell() {
    let display = RecordingDisplay::default();
    let chars = Rc::clone(&display.chars);
    let mut machine = Machine::new(
      Box::new(display),
      Box::new(NullInput),
      Box::new(MemBlockDevice::new(0)),
    );
    // 100x32 text surface: 10 columns x 2 rows = 20 cells.
    let assembly = assemble(
      "ldw a, 1\n\
       ldw b, 100\n\
       ldw c, 32\n\
       int 0x70\n\
       ldw a, 65\n\
       ldw b, 500\n\
       ldw c, 0xFFFFFF\n\
       int 0x72\n\
       int 0xFF\n",
    )
    .expect("assemble");
    machine.load_program(&assembly.cells);
    machine.run();
    assert_eq!(chars.borrow().as_slice(), &[(19, 65, 0xFFFFFF)]);
  }

  #[test]
  fn set_pixel_in_text_mode_is_ignored() {
    let machine = run_with_display(
      "ldw a, 1\n\
       ldw b, 100\n\
       ldw c, 32\n\
       int 0x70\n\
       ldw a, 0xFF\n\
       ldw b, 9999\n\
       ldw c, 9999\n\
       int 0x71\n\
       int 0xFF\n",
    );
    // Wrong mode: no fault, no pixel, clean halt.
    assert_eq!(machine.register(Register::A), 0xFF);
  }

  struct ScriptedInput {
    frames: Vec<Vec<u32>>,
    cursor: usize,
  }

  impl InputPort for ScriptedInput {
    fn pressed_keycodes(&mut self) -> Vec<u32> {
      let frame = self.frames.get(self.cursor).cloned().unwrap_or_default();
      self.cursor += 1;
      frame
    }
  }

  #[test]
  fn key_poll_reports_new_press_then_held_repeat() {
    let input = ScriptedInput {
      frames: vec![vec![42, 7], vec![7], vec![]],
      cursor: 0,
    };
    let mut machine = Machine::new(
      Box::new(NullDisplay),
      Box::new(input),
      Box::new(MemBlockDevice::new(0)),
    );

    machine.service_interrupt(int_code::KEY_POLL).unwrap();
    // Lowest keycode wins, reported as a new press.
    assert_eq!(machine.register(Register::A), 7);
    assert_eq!(machine.register(Register::B), 1);

    machine.service_interrupt(int_code::KEY_POLL).unwrap();
    assert_eq!(machine.register(Register::A), 7);
    assert_eq!(machine.register(Register::B), 0); // held repeat

    machine.service_interrupt(int_code::KEY_POLL).unwrap();
    assert_eq!(machine.register(Register::A), 0); // released
    assert_eq!(machine.register(Register::B), 0);

    // The remembered key was cleared, so the next press is new again.
    let input = ScriptedInput {
      frames: vec![vec![7]],
      cursor: 0,
    };
    machine.input_port = Box::new(input);
    machine.service_interrupt(int_code::KEY_POLL).unwrap();
    assert_eq!(machine.register(Register::B), 1);
  }

  // A block device that records whether it was ever touched.
  struct RecordingBlockDevice {
    touched: Rc<RefCell<bool>>,
    inner: MemBlockDevice,
  }

  impl BlockDevice for RecordingBlockDevice {
    fn exists(&self, drive: u8) -> bool {
      self.inner.exists(drive)
    }
    fn read_byte(&mut self, drive: u8, sector: u8, offset: u8) -> std::io::Result<u8> {
      *self.touched.borrow_mut() = true;
      self.inner.read_byte(drive, sector, offset)
    }
    fn write_byte(&mut self, drive: u8, sector: u8, offset: u8, value: u8) -> std::io::Result<()> {
      *self.touched.borrow_mut() = true;
      self.inner.write_byte(drive, sector, offset, value)
    }
  }

  #[test]
  fn block_read_with_invalid_drive_never_touches_the_device() {
    let touched = Rc::new(RefCell::new(false));
    let device = RecordingBlockDevice {
      touched: Rc::clone(&touched),
      inner: MemBlockDevice::new(10),
    };
    let mut machine = Machine::new(Box::new(NullDisplay), Box::new(NullInput), Box::new(device));
    let assembly = assemble(
      "ldw a, 12\n\
       ldw b, 0\n\
       ldw c, 0\n\
       int 0x80\n",
    )
    .expect("assemble");
    machine.load_program(&assembly.cells);
    machine.run();

    assert!(!machine.is_running());
    assert_eq!(machine.register(Register::A), 0x81);
    assert_eq!(machine.register(Register::C), 0);
    assert!(!*touched.borrow());
  }

  #[test]
  fn block_validation_error_codes_follow_field_order() {
    for (a, b, c, expected) in [
      (12, 0, 0, 0x81),  // drive out of range
      (0, 16, 0, 0x82),  // sector out of range
      (0, 0, 255, 0x83), // offset out of range
    ] {
      let mut machine = Machine::headless();
      machine.set_register(Register::A, a);
      machine.set_register(Register::B, b);
      machine.set_register(Register::C, c);
      machine.service_interrupt(int_code::BLOCK_READ).unwrap();
      assert_eq!(machine.register(Register::A), expected);
      assert!(!machine.is_running());
    }
  }

  #[test]
  fn block_read_of_an_absent_drive_reports_0x84() {
    let mut machine = Machine::headless(); // zero drives
    machine.service_interrupt(int_code::BLOCK_READ).unwrap();
    assert_eq!(machine.register(Register::A), 0x84);
    assert!(!machine.is_running());
  }

  #[test]
  fn block_write_then_read_round_trips() {
    let mut machine = Machine::new(
      Box::new(NullDisplay),
      Box::new(NullInput),
      Box::new(MemBlockDevice::new(1)),
    );
    let assembly = assemble(
      "ldw a, 0\n\
       ldw b, 3\n\
       ldw c, 17\n\
       ldw d, 0xAB\n\
       int 0x81\n\
       int 0x80\n\
       int 0xFF\n",
    )
    .expect("assemble");
    machine.load_program(&assembly.cells);
    machine.run();

    assert_eq!(machine.register(Register::E), 0xAB);
    assert_eq!(machine.register(Register::A), 0); // no error code delivered
  }

  #[test]
  fn error_interrupt_is_terminal() {
    let machine = run_source("int 0xFE\n");
    assert!(!machine.is_running());
  }

  #[test]
  fn fetch_pads_instructions_truncated_at_the_boundary() {
    let mut machine = Machine::headless();
    // An ldw whose operands hang off the end of memory.
    let mut program = vec![0; MEMORY_SIZE];
    program[MEMORY_SIZE - 1] = 0x01;
    machine.load_program(&program);
    machine.pc = MEMORY_SIZE - 1;
    machine.step();
    // ldw a, 0 executed; PC ran past the end; next step halts.
    assert_eq!(machine.register(Register::A), 0);
    machine.step();
    assert!(!machine.is_running());
  }

  #[test]
  fn program_counter_advances_before_execution() {
    let mut machine = Machine::headless();
    let assembly = assemble("ldw a, 5\nint 0xFF\n").expect("assemble");
    machine.load_program(&assembly.cells);
    machine.step();
    assert_eq!(machine.pc(), 3);
    assert_eq!(machine.register(Register::A), 5);
  }

  #[test]
  fn state_dump_lists_memory_in_sixteen_cell_rows() {
    let machine = run_source("ldw a, 5\nint 0xFF\n");
    let dump = machine.to_string();
    assert!(dump.contains("Registers"));
    assert!(dump.contains("Stack"));
    assert!(dump.contains("Total cycles: 2"));
    assert!(dump.contains("0x0000: "));
    assert!(dump.contains("0x00F0: "));
  }
}
