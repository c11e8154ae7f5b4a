pub mod chain;
pub mod clock;
