pub mod audio;
pub mod backup;
pub mod bootstrap;
pub mod config;
pub mod cutscenes;
pub mod error;
pub mod filesystem;
pub mod gui;
pub mod images;
pub mod logging;
pub mod patch;
pub mod rewrite;
pub mod runtime;
pub mod sysimg;
pub mod tools;
pub mod unpack;
pub mod workflow;
