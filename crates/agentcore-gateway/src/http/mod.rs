pub mod cost;
pub mod health;
pub mod sessions;
pub mod turns;
