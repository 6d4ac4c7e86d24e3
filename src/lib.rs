#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod agent;
pub mod candidate;
pub mod checklist;
pub mod compat;
pub mod control;
mod error;
pub mod events;
pub mod priority;
pub mod rand;
pub mod sdp;
pub mod state;
pub mod stream;
pub mod transport;
pub mod url;
pub mod use_candidate;

pub use error::Error;
