pub mod event;
pub mod gameplay;
pub mod input_source;
pub mod judgment;
pub mod note;
pub mod render;
pub mod scroll;
pub mod song;
