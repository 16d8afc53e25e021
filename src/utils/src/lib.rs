pub mod algo;
pub mod cmd_helper;
