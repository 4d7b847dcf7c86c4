// CLI commands for the bottle relay

use crate::relay::indicator::DEFAULT_INDICATOR_LINES;
use crate::relay::server::DEFAULT_SERVER_NAME;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default location of the relay socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/bottle.sock";

/// Bottle relay CLI
#[derive(Debug, Parser)]
#[command(name = "bottle", version)]
#[command(about = "Relay server for storing and distributing text messages")]
pub struct BottleCli {
    #[command(subcommand)]
    pub command: BottleCommand,
}

/// Bottle subcommands
#[derive(Debug, Subcommand)]
pub enum BottleCommand {
    /// Run the relay server
    Serve(ServeArgs),

    /// Store a message
    Push {
        #[command(flatten)]
        conn: ConnectArgs,

        /// Reply destination
        #[arg(short, long)]
        dest: String,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        age: Option<String>,

        #[arg(long)]
        subject: Option<String>,

        #[arg(short, long)]
        message: Option<String>,

        /// Extra field as KEY=VALUE (repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Take the first message matching the given patterns
    Pull {
        #[command(flatten)]
        conn: ConnectArgs,

        /// Reply destination
        #[arg(short, long)]
        dest: String,

        /// Pattern for the Author field
        #[arg(long)]
        author: Option<String>,

        /// Pattern for the Age field
        #[arg(long)]
        age: Option<String>,

        /// Pattern for the Subject field
        #[arg(long)]
        subject: Option<String>,

        /// Pattern for the Message field
        #[arg(short, long)]
        message: Option<String>,

        /// Read the message without removing it (pullr)
        #[arg(long)]
        peek: bool,
    },

    /// Send a raw JSON request
    Send {
        #[command(flatten)]
        conn: ConnectArgs,

        /// Request object, e.g. '{"Action":"pull","Dest":"me"}'
        request: String,
    },
}

/// Options for `bottle serve`
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Unix socket to listen on
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Message database (default: ~/.bottle/bottle.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Name announced in the logs
    #[arg(short, long, default_value = DEFAULT_SERVER_NAME)]
    pub name: String,

    /// File to use for log output (default: ~/.bottle/bottle.log)
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    /// Also log to the file when running in the foreground
    #[arg(short = 'l', long)]
    pub log_to_file: bool,

    /// Indicator output lines, least significant bit first
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_INDICATOR_LINES.to_vec())]
    pub indicator_lines: Vec<u32>,

    /// Only log the message count
    #[arg(long, conflicts_with = "indicator_lines")]
    pub no_indicator_lines: bool,
}

impl ServeArgs {
    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| BottleCli::state_dir().join("bottle.db"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.logfile
            .clone()
            .unwrap_or_else(|| BottleCli::state_dir().join("bottle.log"))
    }

    pub fn indicator_lines(&self) -> Vec<u32> {
        if self.no_indicator_lines {
            Vec::new()
        } else {
            self.indicator_lines.clone()
        }
    }
}

/// Options shared by the client commands
#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    /// Relay socket
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Seconds to wait for a reply
    #[arg(short, long, default_value = "5")]
    pub timeout: u64,
}

impl BottleCli {
    /// Get the state directory
    pub fn state_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".bottle")
    }
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = BottleCli::try_parse_from(["bottle", "serve"]).unwrap();
        let BottleCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        assert_eq!(args.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(args.name, DEFAULT_SERVER_NAME);
        assert_eq!(args.indicator_lines(), DEFAULT_INDICATOR_LINES.to_vec());
        assert!(args.db_path().ends_with(".bottle/bottle.db"));
        assert!(!args.log_to_file);
    }

    #[test]
    fn test_serve_options() {
        let cli = BottleCli::try_parse_from([
            "bottle",
            "serve",
            "--db",
            "/tmp/x.db",
            "--indicator-lines",
            "3,5",
            "-l",
        ])
        .unwrap();
        let BottleCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        assert_eq!(args.db_path(), PathBuf::from("/tmp/x.db"));
        assert_eq!(args.indicator_lines(), vec![3, 5]);
        assert!(args.log_to_file);

        let cli = BottleCli::try_parse_from(["bottle", "serve", "--no-indicator-lines"]).unwrap();
        let BottleCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.indicator_lines().is_empty());
    }

    #[test]
    fn test_push_fields() {
        let cli = BottleCli::try_parse_from([
            "bottle", "push", "--dest", "me", "--author", "alice", "-f", "Mood=ok",
        ])
        .unwrap();
        match cli.command {
            BottleCommand::Push { dest, author, fields, .. } => {
                assert_eq!(dest, "me");
                assert_eq!(author.as_deref(), Some("alice"));
                assert_eq!(fields, vec![("Mood".to_string(), "ok".to_string())]);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(BottleCli::try_parse_from(["bottle", "push", "--dest", "me", "-f", "novalue"]).is_err());
    }

    #[test]
    fn test_state_dir() {
        let dir = BottleCli::state_dir();
        assert!(dir.ends_with(".bottle"));
    }
}
