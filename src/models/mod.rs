pub mod duration;
pub mod environment;
pub mod token;
