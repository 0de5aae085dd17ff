//! Call lifecycle: the state machine a status view reads, and the
//! controller that owns a call from start to hang-up.
//!
//! # Architecture
//!
//! ```text
//!                  CallController::start_call()
//!                             │
//!   MicrophoneSource ─AudioChunk─▶ capture pump ─┐
//!   CameraSource ─────frames────▶ video ticker ──┼─▶ outbound ─▶ LiveConnector
//!                                                │
//!   SpeakerSource ◀── OutputTimeline ◀── playback task ◀── inbound ◀─┘
//!
//! SharedStatus (Arc<Mutex<CallStatus>>) ←─── read by the status view
//! ```

pub mod controller;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use controller::{CallController, SessionError};
pub use state::{
    lock_status, new_shared_status, Activity, CallState, CallStatus, SharedStatus,
};
