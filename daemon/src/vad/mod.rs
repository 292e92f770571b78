pub mod silence;

pub use silence::{watch_for_end_of_turn, EndOfTurn, SilenceDetector};
