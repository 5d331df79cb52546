mod cli;

use clap::Parser;
use console::style;
use rydde_lib::pipeline::install_signal_handler;

fn main() {
    env_logger::init();
    install_signal_handler();

    let args = cli::Cli::parse();

    let outcome = match args.command {
        cli::Commands::Rules { path } => cli::load_rules(&args.rules)
            .and_then(|rules| cli::rules::handle_rules_command(rules, path, args.verbose)),

        cli::Commands::Metadata { path } => cli::metadata::handle_metadata_command(path),

        cli::Commands::Full {
            paths,
            no_ai,
            json,
            ollama_url,
            expect_disaggregate,
            expect_keep,
        } => cli::load_config(args.db.clone()).and_then(|config| {
            let rules = cli::load_rules(&args.rules)?;
            let categories = cli::load_categories(&args.categories)?;
            cli::full::handle_full_command(
                config,
                rules,
                categories,
                cli::full::FullOptions {
                    paths,
                    no_ai,
                    json,
                    ollama_url,
                    expect_disaggregate,
                    expect_keep,
                },
                args.verbose,
            )
        }),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
