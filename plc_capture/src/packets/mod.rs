mod command;
mod frame;

pub use command::*;
pub use frame::*;
