pub mod core;
pub mod game;
pub mod leaderboard;
pub mod students;
