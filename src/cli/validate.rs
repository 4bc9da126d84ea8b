//! Validation subcommand

use super::{CliError, IdArgs, OutputFormat};
use clap::Parser;

/// Validate command: normalize identifiers without fetching anything
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Identifiers to check
    #[command(flatten)]
    pub input: IdArgs,
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let raw = self.input.collect()?;

        match self.input.normalized() {
            Ok(ids) => {
                match format {
                    OutputFormat::Json => {
                        let output = serde_json::json!({
                            "supplied": raw.len(),
                            "unique": ids.len(),
                            "identifiers": ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
                        });
                        println!("{output}");
                    }
                    OutputFormat::Human => {
                        println!("{} identifier(s), {} unique:", raw.len(), ids.len());
                        for id in &ids {
                            println!("  {id}");
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                eprintln!("Invalid identifiers: {}", e);
                Err(e)
            }
        }
    }
}
