// src/stream/mod.rs

//! Consumers for the engine's streaming responses
//!
//! - [`StreamDemuxer`] splits a container's attach stream into stdout/stderr
//! - [`BuildOutputParser`] follows an image build and recovers the image id

pub mod build_output;
pub mod demux;

pub use build_output::{BuildMessage, BuildOutputParser};
pub use demux::{StreamDemuxer, StreamType};
