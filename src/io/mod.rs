// src/io/mod.rs
//
// Everything that physically crosses a wire: the Modbus/TCP primitive used
// by device adapters, and the three serial links used to cross the diode.

pub mod modbus;
pub mod serial;
