pub mod frame;
pub mod localizer;

pub use frame::{BoundingBox, Landmark, decode_base64_frame, decode_frame};
pub use localizer::{HandDetection, HandLandmarks, HandLocalizer, LandmarkDetector, NoLandmarks};
