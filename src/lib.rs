pub mod arg_parser;
pub mod config;
pub mod controller;
pub mod controller_group;
pub mod device_io;
pub mod errors;
pub mod fan_curve;
pub mod logger;
