//! Multi-user room sync core: membership, peer mesh, shared canvas, and
//! reconciled task lists over a frame relay.

pub mod authority;
pub mod config;
pub mod frame;
pub mod ids;
pub mod media;
pub mod relay;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod transport;
