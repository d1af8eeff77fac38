#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod design;
pub mod draws;
pub mod estimate;
pub mod matrix;
pub mod model;
pub mod predict;
pub mod probability;
pub mod sequence;
pub mod types;

#[cfg(test)]
mod test_fixtures;
