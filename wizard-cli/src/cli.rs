//! CLI argument parsing for the wizard console.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WizardKind {
    /// Reassign master component
    Reassign,
    /// Enable NameNode high availability
    EnableHa,
}

#[derive(Debug, Parser)]
#[command(name = "ambari-wizard")]
#[command(about = "Run cluster administration wizards against the Ambari REST API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Console config file (TOML); defaults apply when it does not exist
    #[arg(long, default_value = "ambari-wizard.toml", global = true)]
    pub config: PathBuf,

    /// Directory for persisted wizard state (overrides the config file)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Answer every request locally; nothing is sent to the server
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Move a master component to another host
    Reassign {
        /// Component to move (e.g. NAMENODE)
        #[arg(long)]
        component: String,

        /// Service owning the component (e.g. HDFS)
        #[arg(long)]
        service: String,

        #[arg(long)]
        source_host: String,

        #[arg(long)]
        target_host: String,

        /// Stop after the steps that need manual work on the hosts
        #[arg(long)]
        manual_steps: bool,

        /// NameNode HA is enabled on the cluster
        #[arg(long)]
        namenode_ha: bool,

        /// Installed service (repeatable)
        #[arg(long = "installed-service")]
        installed_services: Vec<String>,

        /// Component host as COMPONENT=host (repeatable)
        #[arg(long = "master-host", value_parser = parse_pair)]
        master_hosts: Vec<(String, String)>,

        /// Database type for Hive and Oozie servers
        #[arg(long, default_value = "mysql")]
        db_type: String,

        /// The database is not managed by the cluster
        #[arg(long)]
        remote_db: bool,
    },

    /// Finish enabling NameNode high availability
    EnableHa {
        #[arg(long)]
        nameservice: String,

        #[arg(long)]
        current_namenode: String,

        #[arg(long)]
        additional_namenode: String,

        #[arg(long)]
        secondary_namenode: Option<String>,

        /// Installed service (repeatable)
        #[arg(long = "installed-service")]
        installed_services: Vec<String>,
    },

    /// Retry the failed task of a wizard and continue
    Retry {
        #[arg(value_enum)]
        wizard: WizardKind,
    },

    /// Show the step and task statuses of a wizard
    Status {
        #[arg(value_enum)]
        wizard: WizardKind,
    },

    /// Forget everything a wizard persisted
    Reset {
        #[arg(value_enum)]
        wizard: WizardKind,
    },

    /// Map a stack versions response into stack, OS and repository records
    MapStacks {
        /// Saved response; fetched from the server when omitted
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long, default_value = "HDP")]
        stack: String,
    },

    /// Download the chosen management packs
    DownloadMpacks {
        /// Saved registry response; fetched from the server when omitted
        #[arg(long)]
        registry_file: Option<PathBuf>,

        /// Pack to download as NAME=VERSION (repeatable)
        #[arg(long = "mpack", value_parser = parse_pair, required = true)]
        mpacks: Vec<(String, String)>,
    },
}

pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_need_both_sides() {
        assert_eq!(
            parse_pair("NAMENODE=host1"),
            Ok(("NAMENODE".to_string(), "host1".to_string()))
        );
        assert!(parse_pair("NAMENODE").is_err());
        assert!(parse_pair("=host1").is_err());
    }

    #[test]
    fn reassign_arguments_parse() {
        let cli = Cli::try_parse_from([
            "ambari-wizard",
            "--dry-run",
            "reassign",
            "--component",
            "RESOURCEMANAGER",
            "--service",
            "YARN",
            "--source-host",
            "h1",
            "--target-host",
            "h2",
            "--installed-service",
            "YARN",
            "--master-host",
            "ZOOKEEPER_SERVER=h3",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Command::Reassign {
                component,
                master_hosts,
                db_type,
                ..
            } => {
                assert_eq!(component, "RESOURCEMANAGER");
                assert_eq!(master_hosts, vec![("ZOOKEEPER_SERVER".to_string(), "h3".to_string())]);
                assert_eq!(db_type, "mysql");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
