//! The Control-Stash-Environment machine.

pub mod control;
pub mod instruction;
pub mod machine;

pub use control::{Control, ControlItem, MachineState, Stash};
pub use instruction::{Instr, NodeRef};
