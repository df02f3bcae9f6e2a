#![forbid(unsafe_code)]

pub mod card_image;
pub mod tabular;
