use clap::Parser;

/// multi-NIC document crawler
#[derive(Parser)]
#[command(name = "nicrawl")]
#[command(about = "Breadth-first crawler that discovers and downloads documents over multiple network interfaces")]
#[command(version)]
pub struct Cli {
    /// seed url
    #[arg(help = "The starting URL to crawl (https:// is assumed when the scheme is missing)")]
    pub start_url: String,

    /// download target dir
    #[arg(
        short,
        long,
        default_value = "./downloads",
        help = "Directory where downloaded documents are written"
    )]
    pub target_dir: String,

    /// selected interfaces
    #[arg(
        short,
        long = "interface",
        required = true,
        help = "Network interface to crawl through, as NAME=IPV4 or NAME=IPV4@SPEED (e.g. enp3s0f0=10.0.0.2@10g); repeat for each selected interface"
    )]
    pub interfaces: Vec<String>,

    /// max crawl depth
    #[arg(
        short,
        long,
        default_value = "13",
        help = "Maximum crawl depth from the seed (seed is depth 0)"
    )]
    pub max_depth: u32,

    /// document extensions
    #[arg(
        short = 'e',
        long = "extension",
        default_value = ".pdf",
        help = "Document extension to download; repeat for multiple (matched as suffix or before ? and &)"
    )]
    pub extensions: Vec<String>,

    /// request user agent
    #[arg(short, long, help = "Override the default browser user agent")]
    pub user_agent: Option<String>,

    /// log dir
    #[arg(
        long,
        default_value = "./logs",
        help = "Directory for the rotating application log"
    )]
    pub log_dir: String,
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
