use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use transpiler::schema::SQLITE_DDL;
use transpiler::{SqlFragment, TranspilerOptions, transpile};

#[derive(Parser)]
#[command(name = "metricsql")]
#[command(about = "Compile MetricsQL queries into parameterized SQL")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: MetricsqlCommands,
}

#[derive(Subcommand)]
enum MetricsqlCommands {
    /// Compile a query and print the SQL with its parameters
    Translate {
        /// MetricsQL query text
        query: String,

        #[arg(long, help = "Print the SQL and parameters as JSON")]
        json: bool,

        #[arg(long, help = "Inline parameters as literals (for reading only)")]
        inline: bool,
    },
    /// Print the schema the generated SQL runs against
    Schema,
    #[command(flatten)]
    Common(CommonCommands),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);
    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        MetricsqlCommands::Common(ref command) => utils::handle_common_command(command, &config),
        MetricsqlCommands::Schema => {
            for statement in SQLITE_DDL {
                println!("{statement};");
            }
            Ok(())
        }
        MetricsqlCommands::Translate {
            query,
            json,
            inline,
        } => {
            let options = transpiler_options(&config)?;
            log::debug!("Transpiler options: {options:?}");

            let sql = transpile(&query, &options).context("Failed to transpile query")?;
            print_fragment(&sql, json, inline)
        }
    }
}

/// Options for compiling, from a configuration that passed validation
fn transpiler_options(config: &Configuration) -> Result<TranspilerOptions> {
    utils::validate_config(config).context("Invalid configuration")?;
    Ok(TranspilerOptions::from(&config.transpiler))
}

fn print_fragment(sql: &SqlFragment, json: bool, inline: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(sql).context("Failed to serialize SQL to JSON")?;
        println!("{json}");
    } else if inline {
        println!("{}", sql.to_debug_sql());
    } else {
        println!("{}", sql.text());
        for (index, parameter) in sql.parameters().iter().enumerate() {
            println!("-- ?{} = {parameter}", index + 1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_configuration() {
        let mut config = Configuration::default();
        config.transpiler.canonical_grouping = false;

        let options = transpiler_options(&config).unwrap();
        assert!(!options.canonical_grouping);
        assert_eq!(options.max_query_bytes, config.transpiler.max_query_bytes);
    }

    #[test]
    fn test_invalid_configuration_is_rejected_before_translating() {
        let mut config = Configuration::default();
        config.transpiler.max_query_bytes = 0;

        let err = transpiler_options(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }

    #[test]
    fn test_translate_arguments_parse() {
        let cli = Cli::parse_from(["metricsql", "--quiet", "translate", "up", "--json"]);
        assert!(cli.common.quiet);
        let MetricsqlCommands::Translate {
            query,
            json,
            inline,
        } = cli.command
        else {
            panic!("Expected translate command");
        };
        assert_eq!(query, "up");
        assert!(json);
        assert!(!inline);
    }
}
