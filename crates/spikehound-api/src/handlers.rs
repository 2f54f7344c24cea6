//! API request handlers

pub mod alert;
pub mod approval;
pub mod health;
pub mod investigations;

pub use alert::*;
pub use approval::*;
pub use health::*;
pub use investigations::*;
