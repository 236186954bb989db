//! # Match Relay Server Library
//!
//! This library implements the server side of the two-player match
//! coordinator: it pairs remote players into rooms keyed by short join
//! codes, gates the session protocol (ready-check, pause, rematch, exit),
//! and relays authoritative game state between the two members with as
//! little added latency as possible.
//!
//! ## Core Responsibilities
//!
//! ### Room Lifecycle
//! Rooms are created on demand, joined by code, and reclaimed the moment
//! they empty. Membership is capped at two and ordered: the first seat is
//! the host, whose client runs the authoritative ball simulation.
//!
//! ### Protocol Gating
//! The server validates every message against the sender's seat before
//! relaying it. Ball and score updates are accepted from the host only;
//! paddle updates are bound to the paddle the sender's role owns. Invalid
//! traffic is logged and dropped without disturbing the room.
//!
//! ### Relay, Not Referee
//! The server performs no physics and no win evaluation. It stamps relayed
//! score and pause events with its own clock so both clients can interpret
//! them in a shared time base, and otherwise forwards payloads verbatim.
//!
//! ## Architecture Design
//!
//! ### Single-Consumer Event Loop
//! All inbound frames from every connection funnel into one queue consumed
//! by the central loop, which is the sole owner of the room registry and
//! connection table. Each event is handled to completion before the next,
//! so state mutations are naturally atomic and no locks are needed.
//!
//! ### Framed TCP Transport
//! Connections are persistent TCP streams carrying length-prefixed bincode
//! frames. The transport preserves per-connection ordering; the protocol
//! never assumes ordering *across* connections, which is why authority is
//! pinned to the host seat instead of resolved by arrival order.
//!
//! ## Module Organization
//!
//! ### Connections Module (`connections`)
//! Connection roster: id assignment, outbound queues, handshake status,
//! idle detection.
//!
//! ### Registry Module (`registry`)
//! The room table: join codes, seating, ready flags, session tokens,
//! empty-room reclamation.
//!
//! ### Session Module (`session`)
//! The protocol state machine: one handler per event kind, authority
//! enforcement, rematch and exit flows, idempotent disconnect cleanup.
//!
//! ### Network Module (`network`)
//! The accept loop, per-connection reader/writer tasks, and the central
//! event loop that ties everything together.

pub mod connections;
pub mod network;
pub mod registry;
pub mod session;
