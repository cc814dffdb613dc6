pub mod devices;
pub mod logs;
pub mod notices;
