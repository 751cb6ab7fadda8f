pub mod window;

pub use minifb::{Key, KeyRepeat};
pub use window::MinifbRenderer;
