pub mod daemon;
pub mod export;
