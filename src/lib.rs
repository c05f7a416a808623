//! Host side of cellar: the native library registered into `lib` and the literal syntax the
//! command line accepts for arguments.

pub mod literal;
pub mod natives;

pub use cellar_runtime as runtime;
