pub mod audio;
pub mod clock;
pub mod context;
pub mod input;
pub mod loading;
pub mod time;
