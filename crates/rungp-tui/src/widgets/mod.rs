pub mod logs;
pub mod phases;
