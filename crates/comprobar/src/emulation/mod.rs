//! Device emulation.

mod device;

pub use device::{DeviceProfile, Viewport, DEFAULT_PROFILE};
