//! heap-dump-companion: decrypt heap dumps collected by the notify sidecar
//!
//! Usage:
//!   heap-dump-companion decrypt -i dump.hprof.crypted -o dump.hprof -k dump.key -t <tenant>
//!
//! The wrapped data key is unwrapped with the tenant's key in the Vault
//! transit engine (`VAULT_ADDR`, `VAULT_TOKEN`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hdm_broker::{VaultTransit, DEFAULT_TRANSIT_MOUNT};
use hdm_companion::{decrypt_heap_dump, CompanionConfig, DecryptJob};
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "heap-dump-companion",
    version,
    about = "Companion tool for encrypted heap dumps",
    long_about = "heap-dump-companion: decrypt heap dumps collected by notify-sidecar \
                  with the transit engine from HashiCorp Vault"
)]
struct Cli {
    /// Config file (default: $HOME/.heap-dump-companion.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HDM_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decrypt a heap dump with its encrypted key using HashiCorp Vault
    ///
    /// Example:
    ///   heap-dump-companion decrypt --input-file test/test.dump.crypted \
    ///     --output-file test/test.dump --key test/test.key -t some-tenant
    Decrypt {
        /// Path to the encrypted heap dump
        #[arg(long, short = 'i')]
        input_file: PathBuf,

        /// Where to write the decrypted heap dump
        #[arg(long, short = 'o')]
        output_file: PathBuf,

        /// Path to the encrypted key of the heap dump
        #[arg(long, short = 'k')]
        key: PathBuf,

        /// Topic/tenant owning the heap dump
        #[arg(long, short = 't', env = "TOPIC")]
        topic: Option<String>,

        /// Mount point of the transit engine
        #[arg(long, short = 'T')]
        transit_mount_point: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = CompanionConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Decrypt {
            input_file,
            output_file,
            key,
            topic,
            transit_mount_point,
        } => {
            let tenant = topic.or_else(|| config.topic.clone()).context(
                "no topic given: pass --topic, set TOPIC or add `topic` to the config file",
            )?;
            let mount = transit_mount_point
                .or_else(|| config.transit_mount_point.clone())
                .unwrap_or_else(|| DEFAULT_TRANSIT_MOUNT.to_string());

            let transit = transit_client(&config, mount)?;
            let job = DecryptJob {
                input: input_file,
                key_file: key,
                output: output_file,
                tenant,
            };
            let written = decrypt_heap_dump(&transit, &job)
                .await
                .with_context(|| format!("decrypting {}", job.input.display()))?;

            println!("Decrypted {} ({written} bytes)", job.output.display());
        }
    }

    Ok(())
}

/// `VAULT_ADDR` wins over the config file's `vault_addr`.
fn transit_client(config: &CompanionConfig, mount: String) -> Result<VaultTransit> {
    match (std::env::var("VAULT_ADDR").ok(), &config.vault_addr) {
        (None, Some(addr)) => {
            let token = std::env::var("VAULT_TOKEN")
                .context("could not find valid vault token on env: VAULT_TOKEN")?;
            Ok(VaultTransit::new(addr.clone(), SecretString::from(token), mount)?)
        }
        _ => Ok(VaultTransit::from_env(mount)?),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_flags() {
        let cli = Cli::try_parse_from([
            "heap-dump-companion",
            "decrypt",
            "-i",
            "dump.hprof.crypted",
            "-o",
            "dump.hprof",
            "-k",
            "dump.key",
            "-t",
            "cloud-beacon",
            "-T",
            "transit-test",
        ])
        .unwrap();
        let Commands::Decrypt {
            input_file,
            output_file,
            key,
            topic,
            transit_mount_point,
        } = cli.command;
        assert_eq!(input_file, PathBuf::from("dump.hprof.crypted"));
        assert_eq!(output_file, PathBuf::from("dump.hprof"));
        assert_eq!(key, PathBuf::from("dump.key"));
        assert_eq!(topic.as_deref(), Some("cloud-beacon"));
        assert_eq!(transit_mount_point.as_deref(), Some("transit-test"));
    }

    #[test]
    fn test_input_output_and_key_required() {
        for missing in ["-i", "-o", "-k"] {
            let mut args = vec!["heap-dump-companion", "decrypt"];
            for (flag, value) in [("-i", "a"), ("-o", "b"), ("-k", "c")] {
                if flag != missing {
                    args.extend([flag, value]);
                }
            }
            assert!(Cli::try_parse_from(args).is_err(), "{missing} should be required");
        }
    }

    #[test]
    fn test_long_flags() {
        let cli = Cli::try_parse_from([
            "heap-dump-companion",
            "decrypt",
            "--input-file",
            "in",
            "--output-file",
            "out",
            "--key",
            "k",
            "--transit-mount-point",
            "m",
        ])
        .unwrap();
        let Commands::Decrypt {
            transit_mount_point,
            ..
        } = cli.command;
        assert_eq!(transit_mount_point.as_deref(), Some("m"));
    }
}
