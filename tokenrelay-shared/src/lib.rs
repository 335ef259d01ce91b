#![cfg_attr(not(test), forbid(unsafe_code))]

//! Types shared by the tokenrelay server and its clients: streamed frames,
//! the text-stream wire codec, and the configuration model.

pub mod config;
pub mod models;
pub mod wire;
