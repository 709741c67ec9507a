use clap::Parser;

/// Solar Matrix - inverter readings on an 8x8 LED matrix
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Read every known register once, print the values and exit
    #[clap(long = "dump-registers")]
    pub dump_registers: bool,

    /// JSON register table used by --dump-registers instead of the built-in one
    #[clap(long = "register-file", requires = "dump_registers")]
    pub register_file: Option<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
