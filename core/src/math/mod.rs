pub mod fft;
pub mod window;

pub use fft::FftHelper;
pub use window::WindowKind;
