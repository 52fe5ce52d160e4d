// Pipeline processing stages: parse, normalize, filter, denoise, validate

pub mod denoise;
pub mod filter;
pub mod normalize;
pub mod parser;
pub mod validate;
