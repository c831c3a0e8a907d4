pub mod check;
pub mod config;
pub mod lineage;
pub mod stack;
pub mod tree;
pub mod turns;
pub mod utils;
