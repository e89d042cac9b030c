pub mod identifier;
pub mod item;
pub mod lyric;
