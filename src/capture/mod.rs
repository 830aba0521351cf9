pub mod format;
pub mod frame;
pub mod isi;
pub mod slots;

pub use format::{FormatNegotiator, FormatTable};
pub use frame::{Format, FrameBuffer, PixelFormat};
pub use isi::{Isi, IsiOptions, SignalResult, StreamState};
