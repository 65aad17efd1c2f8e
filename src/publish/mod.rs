//! Publishing text and image payloads
//!
//! - [`gateway`] - publish helpers returning delivery handles
//! - [`frame`] - raw frames and image encoding

pub mod frame;
pub mod gateway;

pub use frame::{encode_frame, EncodingError, Frame, ImageFormat, PixelLayout};
pub use gateway::{validate_publish_topic, PublishGateway};
