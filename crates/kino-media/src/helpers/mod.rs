// crates/kino-media/src/helpers/mod.rs

pub mod seek;
pub mod stream;
