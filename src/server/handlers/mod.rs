// API处理器模块

pub mod upload;

pub use upload::*;
