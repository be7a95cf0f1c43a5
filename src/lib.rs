//! Appointment-scheduling core for a phone-based virtual receptionist.
//!
//! Each caller utterance arrives pre-classified (intent + raw slot
//! candidates) from an external classifier. [`services::conversation::process_turn`]
//! runs one dialogue turn: it normalizes slots, validates the proposal
//! against business hours and existing bookings, resolves staff, and either
//! asks a follow-up question or commits a booking through the two-phase
//! draft/confirm protocol, optionally mirroring it to an external calendar.

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod services;
pub mod state;
