//! Real-time Japanese spoken-dialogue agent for restaurant-reservation
//! phone calls, terminating a telephony carrier's bidirectional WebSocket
//! (8kHz μ-law audio).
//!
//! The pipeline per call: [`audio`]/[`vad`] turn carrier frames into
//! speech-activity signal, [`asr`] turns speech into text, [`nlu`] extracts
//! slots incrementally from the growing transcript, [`llm`] classifies
//! turn intent and answers store FAQs, [`dst`] advances the dialogue state
//! machine, [`nlg`] renders the next utterance, and [`tts`] turns it back
//! into carrier-ready audio. [`session`] wires all of this together per
//! call; [`server`] terminates the carrier WebSocket itself.

pub mod asr;
pub mod audio;
pub mod clock;
pub mod config;
pub mod dst;
pub mod error;
pub mod llm;
pub mod nlg;
pub mod nlu;
pub mod persistence;
pub mod server;
pub mod session;
pub mod tts;
pub mod vad;

pub use config::Config;
pub use error::{HanasuError, Result};
