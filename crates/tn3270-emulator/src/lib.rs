//! # tn3270-emulator
//!
//! Driving external 3270 terminal emulator processes.
//!
//! This crate provides:
//! - Binary provisioning (emulator + control client executables)
//! - The line-oriented scripting dialect spoken over the control port
//! - The attention-key vocabulary (Enter, Tab, PF1..PF24)
//! - The [`EmulatorDriver`], which owns one emulator process and issues
//!   scripted commands through a control-client child process

pub mod channel;
pub mod driver;
pub mod keys;
pub mod provision;
pub mod script;

pub use channel::{ControlChannel, X3270ifChannel};
pub use driver::{DriverConfig, DriverState, EmulatorDriver};
pub use keys::AidKey;
pub use provision::{AssetSource, BinaryKind, BinaryProvisioner, DirAssetSource};
pub use script::ScriptCommand;
