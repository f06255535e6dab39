use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start linkdrop as a service.
    Daemon {
        /// Address to listen on, overrides `listen` from config.yaml
        #[clap(long)]
        listen: Option<String>,
    },
    /// Save a link through the running daemon
    Save {
        /// a url
        #[clap(allow_hyphen_values = true)]
        url: String,

        /// Link title
        #[clap(short, long)]
        title: Option<String>,

        /// Link description
        #[clap(short, long)]
        description: Option<String>,

        /// Label, repeatable or comma separated
        #[clap(short, long)]
        label: Vec<String>,

        /// low, medium or high
        #[clap(short, long)]
        priority: Option<String>,

        /// Board the link belongs to
        #[clap(short, long)]
        board: Option<String>,

        /// Read page text from a file and send it along for summarization
        #[clap(long)]
        text_file: Option<std::path::PathBuf>,
    },
    /// Print sync messages still waiting for a dashboard
    Queue {},
    /// Print saved links
    Links {},
    /// Remove every saved link and pending sync message
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}
