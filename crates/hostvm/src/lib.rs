pub mod abi;
pub mod error;
pub mod machine;
pub mod replay;
pub mod tx;
#[cfg(test)]
mod tests;

pub use abi::{HostAbi, Program};
pub use error::MachineError;
pub use machine::{Machine, MachineConfig};
pub use replay::{Event, EventLog};
pub use tx::{data_hash, Cell, Transaction, Witness};
