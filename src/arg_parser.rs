use std::path::PathBuf;

use argparse::{ArgumentParser, Print, StoreOption, StoreTrue};

use crate::config::Backend;

#[derive(Debug, Default)]
pub struct ArgsOptions {
    pub config_file_path: Option<PathBuf>,

    // Override the configuration file values
    pub device_count: Option<u32>,
    pub backend: Option<Backend>,

    pub verbose: bool,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description(
                "Drive NVIDIA GPU fan speeds from a temperature curve",
            );

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                StoreOption,
                "The file path of the Json configuration file",
            );

            parser.refer(&mut options.device_count).add_option(
                &["-n", "--devices"],
                StoreOption,
                "Number of GPUs to control, starting from index 0",
            );

            parser.refer(&mut options.backend).add_option(
                &["-b", "--backend"],
                StoreOption,
                "Device access: \"nvidia-settings\" or \"nvml\"",
            );

            parser.refer(&mut options.verbose).add_option(
                &["-v", "--verbose"],
                StoreTrue,
                "Log every polling cycle",
            );

            // Show daemon version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the daemon version",
            );

            parser.parse_args_or_exit();
        }

        options
    }
}
