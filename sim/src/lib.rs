// Bench doubles for the capture controller: a virtual PLC that drives a
// full session over any link, and a camera that writes placeholder images.

pub mod camera;
pub mod plc;

pub use camera::SimCamera;
pub use plc::{PlcReport, VirtualPlc};
