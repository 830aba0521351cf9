//! Hosted simulation of the ISI and its camera source

pub mod isi;
pub mod sensor;

pub use isi::SimulatedIsi;
pub use sensor::{SensorState, SimulatedSensor};
