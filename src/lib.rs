//! WhatsApp assistant core for a travel agency: burst aggregation, the
//! outbound dispatcher, control-block parsing, rich reply sequencing and
//! the quote-window worker.

pub mod app;
pub mod channel;
pub mod config;
pub mod control;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod markers;
pub mod ports;
pub mod prompting;
pub mod quote;
pub mod realtime;
pub mod replies;
pub mod retry;
pub mod scheduler;
pub mod search;
pub mod sequencer;
pub mod store;
pub mod types;

#[cfg(test)]
mod fakes;

pub use error::{Error, Result};
