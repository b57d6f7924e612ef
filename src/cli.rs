use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "appealbot")]
#[command(author, version, about = "Job orchestration core of the traffic-violation appeal bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the scheduler, the deadline timer and the broker consumer
    Run,

    /// Print the persisted task map as JSON
    ListTasks {
        /// Only show tasks of this user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Run one scheduler sweep and exit
    SweepOnce,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
