//! Platform voice adapters.

pub mod cpal;
pub mod software;

pub use self::cpal::CpalBackend;
pub use software::{SoftwareBackend, SoftwareMixer, SoftwareVoice};
