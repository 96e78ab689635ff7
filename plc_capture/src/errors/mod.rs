mod capture_error;

pub use capture_error::*;
