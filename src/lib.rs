//! Real-time interview coaching backend.
//!
//! A single process hosts many session rooms. Each room bridges live audio
//! (browser microphone or meeting bot) to a cloud speech/LLM service and
//! fans transcript, coaching, and analytics events out to its WebSocket
//! clients.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod room;
pub mod services;
pub mod state;
pub mod types;
