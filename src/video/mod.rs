//! Optional camera frame uplink.
//!
//! At a fixed, low interval the current frame of a [`FrameSource`] is
//! scaled down, compressed to JPEG and queued as an `image/jpeg` media
//! frame.  The path is best-effort: a missing frame, an encode error or a
//! full outbound queue skips that tick and nothing else.

pub mod frames;
pub mod ticker;

pub use frames::{
    encode_jpeg, CameraSource, FrameSource, StillFrameSource, StillImageCamera, VideoError,
};
pub use ticker::{spawn_video_ticker, VideoTicker};
