use clap::Parser;
use meridian::cli::{
    handle_completions, handle_config_init, handle_config_validate, Cli, Commands, ConfigCommands,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => meridian::cli::serve::run_serve(args).await,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Init(args) => handle_config_init(&args),
            ConfigCommands::Validate(args) => handle_config_validate(&args).map(|summary| {
                println!("{}", summary);
            }),
        },
        Commands::Completions(args) => {
            handle_completions(&args);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
