//! # Match Client Library
//!
//! Client-side implementation of the two-player match protocol: session
//! management, state reconciliation, and (on the host) the authoritative
//! ball simulation. Rendering and input capture are deliberately out of
//! scope; a UI embeds this library through the event contract and reads
//! the match state it maintains.
//!
//! ## Architecture Overview
//!
//! ### Host-Authoritative Simulation
//! The host client runs the only real ball physics. Each fixed step it
//! advances the ball, detects wall/paddle reflections and goal crossings
//! (latched so one crossing scores exactly once), and relays position,
//! velocity and score through the server to the guest.
//!
//! ### Interpolated Mirroring
//! Entities the local client does not control (the opposing paddle, and
//! the ball on the guest) are rendered from a small jitter buffer of
//! timestamped samples: linear interpolation between the two newest
//! samples, a hold on out-of-order arrivals, and a snap when the
//! authoritative value diverges too far from the screen.
//!
//! ### Shared Time Base
//! A periodic round trip with the server estimates the local clock's
//! offset, so timestamps stamped by the opposite peer can be interpreted
//! in a common base when computing interpolation windows.
//!
//! ### Bounded Reconnection
//! The session record (room id, token, role) is persisted, and an
//! unexpected drop mid-game triggers automatic rejoin attempts with a
//! fixed retry budget. A room that no longer exists is a terminal,
//! user-visible failure, never an infinite retry loop.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Match phase machine, host ball physics, scoring and win detection,
//! pause/rematch handling.
//!
//! ### Network Module (`network`)
//! The protocol state (`ClientState`), the connection-phase machine, and
//! the transport loop (`Client`).
//!
//! ### Session Module (`session`)
//! The durable session record used for silent rejoin after a restart.
//!
//! ### Sync Module (`sync`)
//! Sample buffers, interpolation, and clock-offset estimation.

pub mod game;
pub mod network;
pub mod session;
pub mod sync;
