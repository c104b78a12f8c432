//! Compiler driver for kefir.
//!
//! The driver owns everything outside the compilation core: command-line
//! parsing, the scoped temporary-file session, external assembler and
//! linker invocation, and environment-based toolchain configuration. The
//! core ([`kefir_codegen`]) never touches process-global state.

pub mod config;
pub mod driver;
pub mod externals;
pub mod session;
pub mod tools;

pub use crate::config::DriverConfig;
pub use crate::driver::Driver;
