//! Command-line utility for operating Herald
//!
//! - Check push tokens against the provider formats
//! - Validate a configuration file and show the effective settings

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use herald::Herald;
use herald_tokens::TokenValidator;

/// Command-line utility for operating Herald
#[derive(Parser, Debug)]
#[command(name = "heraldctl")]
#[command(about = "Inspect Herald push tokens and configuration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate one or more push tokens
    Validate {
        /// Tokens to check
        #[arg(required = true)]
        tokens: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Parse and validate a configuration file, printing the effective values
    CheckConfig {
        /// Config file to check (defaults to the usual lookup)
        path: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { tokens, format } => validate(&tokens, format),
        Commands::CheckConfig { path } => check_config(path),
    }
}

fn validate(tokens: &[String], format: OutputFormat) -> anyhow::Result<()> {
    let validator = TokenValidator::new();
    let mut invalid = 0;

    for token in tokens {
        let result = validator.validate(token);
        if !result.is_valid {
            invalid += 1;
        }

        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "token": token, "result": result })
                );
            }
            OutputFormat::Text => {
                let verdict = if result.is_valid { "valid" } else { "INVALID" };
                println!("{token}");
                println!("  format:  {}", result.format);
                println!("  status:  {verdict}");
                println!("  length:  {}", result.metadata.length);
                if let Some(platform) = result.metadata.platform_hint {
                    println!("  platform: {platform}");
                }
                for error in &result.errors {
                    println!("  error:   {error}");
                }
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} of {} token(s) invalid", tokens.len());
    }

    Ok(())
}

fn check_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => Herald::find_config_file()?,
    };

    let herald = Herald::load(&path)?;
    let effective =
        ron::ser::to_string_pretty(&herald, ron::ser::PrettyConfig::default())?;

    println!("# {} is valid", path.display());
    println!("{effective}");

    Ok(())
}
