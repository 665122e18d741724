/*!
  Hexad: a small six-register computer with 256 cells of memory, a 32-slot
  call/data stack, and an interrupt table for its peripherals.

  The crate splits into the static and the dynamic halves of the system:

   * [`isa`] — the instruction set table both halves share;
   * [`assembler`] — source text to encoded cells, via a checker that
     validates everything before a single cell is emitted;
   * [`machine`] — the execution engine, with faults delivered through the
     error interrupt rather than unwinding;
   * [`ports`] — the peripheral seams (display, input, block storage) the
     machine drives through trait objects.
*/

pub mod assembler;
pub mod fault;
pub mod isa;
pub mod machine;
pub mod ports;
