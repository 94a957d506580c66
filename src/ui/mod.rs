pub mod progress;

pub use progress::RankBoard;
