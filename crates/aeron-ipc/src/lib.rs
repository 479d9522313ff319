//! The IPC publication and its reader-side counterpart, the image: the
//! simplest fully-specifiable instance of a log-buffer producer/consumer
//! pair, with flow control, lifecycle and untethered-subscriber handling.

pub mod error;
pub mod image;
pub mod publication;
pub mod subscribable;

pub use error::{ IpcError, Result };
pub use image::Image;
pub use publication::{ IpcPublication, PublicationEvent, PublicationState, PublicationTimeouts };
pub use subscribable::{ SubscribableEntry, TetherState };
