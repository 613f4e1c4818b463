//! Room-scoped domain services.
//!
//! ARCHITECTURE
//! ============
//! Each service is a plain state machine with no I/O: inputs go in through
//! `&mut self` methods, and outcomes come back as values the caller turns
//! into frames, media calls, or authority requests. The relay drives
//! `membership`; a client session drives `mesh`, `canvas`, and `lists`.

pub mod canvas;
pub mod lists;
pub mod membership;
pub mod mesh;
