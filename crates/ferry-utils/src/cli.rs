use clap::{Args, Parser, Subcommand, ValueEnum};
use ferry_core::BackendKind;

#[derive(Parser)]
#[command(name = "ferry-utils")]
#[command(about = "Inspection tooling for resumable enumeration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enumerate a local tree, printing the resume token after each entry
    #[command(alias = "list")]
    Ls(ListArgs),
    /// Decode a resume token and print its contents
    Token(TokenArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    /// Local directory to enumerate
    pub path: String,
    /// Wildcard pattern matched against file names
    #[arg(long)]
    pub pattern: Option<String>,
    #[arg(long, short = 'r')]
    pub recursive: bool,
    /// Include directory entries
    #[arg(long)]
    pub dirs: bool,
    /// Resume after the entry that printed this token
    #[arg(long)]
    pub resume: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
    /// Also show the name each entry would get on this kind of destination
    #[arg(long, value_enum)]
    pub dest: Option<DestinationKind>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct TokenArgs {
    pub token: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum DestinationKind {
    Local,
    ObjectStore,
    Share,
}

impl From<DestinationKind> for BackendKind {
    fn from(kind: DestinationKind) -> Self {
        match kind {
            DestinationKind::Local => BackendKind::Local,
            DestinationKind::ObjectStore => BackendKind::ObjectStore,
            DestinationKind::Share => BackendKind::Share,
        }
    }
}
