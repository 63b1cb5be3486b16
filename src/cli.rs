use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zipkit")]
#[command(version)]
#[command(about = "Create, list and extract password-protected ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipkit unzip docs.zip -d out           extract docs.zip into out/\n  \
  zipkit zip docs docs.zip -P secret     archive docs/ with AES-256\n  \
  zipkit list -v docs.zip                show sizes and timestamps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract an archive
    Unzip(UnzipArgs),
    /// Create an archive from a directory
    Zip(ZipArgs),
    /// List archive contents
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct UnzipArgs {
    /// ZIP file path or file:// URI
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    pub extract_dir: String,

    /// Password for encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD", default_value = "")]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct ZipArgs {
    /// Directory to archive
    #[arg(value_name = "SOURCE_DIR")]
    pub source: String,

    /// Archive to create
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Encrypt entries with this password
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Compression level, 0 (fastest) to 9 (best)
    #[arg(short = 'l', value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(0..=9))]
    pub level: Option<u8>,

    /// Store entries without compression
    #[arg(long)]
    pub store: bool,

    /// Keep the source directory name as the top-level folder
    #[arg(long)]
    pub include_root: bool,

    /// AES key size in bits
    #[arg(long, value_name = "BITS", default_value_t = 256, value_parser = parse_aes_bits)]
    pub aes: u16,

    /// Use legacy ZipCrypto instead of AES (weak)
    #[arg(long, conflicts_with = "aes")]
    pub legacy_zipcrypto: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// ZIP file path or file:// URI
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

fn parse_aes_bits(value: &str) -> Result<u16, String> {
    match value {
        "128" => Ok(128),
        "192" => Ok(192),
        "256" => Ok(256),
        _ => Err(format!("unsupported AES key size {value}, expected 128, 192 or 256")),
    }
}
