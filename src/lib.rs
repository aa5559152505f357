//! CalorieSnap: estimate the calories in a food photo.
//!
//! An image comes from a file or a live camera frame, is encoded for
//! transport, and is handed to an external estimation service whose
//! free-text answer is displayed.

pub mod camera;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod estimation;
pub mod session;
pub mod shell;
mod texture;
pub mod ui;

pub use config::Config;
pub use encoder::EncodedImage;
pub use session::{AppState, Event, Phase};
pub use shell::Shell;
pub use ui::CalorieSnapApp;
