mod driver;
mod driver_config;

pub use driver::*;
pub use driver_config::*;
