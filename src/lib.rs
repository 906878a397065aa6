//! Agentstage library - audio-reactive talking agent avatar

pub mod audio;
pub mod cli;
pub mod controller;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod motion;
pub mod params;
pub mod rendering;
pub mod stage;
pub mod transport;
pub mod visualizer;
