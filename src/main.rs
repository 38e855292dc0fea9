use std::path::PathBuf;

use imgflow::app::{self, RunOptions};
use imgflow::autocomplete::Availability;
use imgflow::model::ResourceScope;

const USAGE: &str = "imgflow - Browse, vote and comment on imgflow galleries from the terminal.

  --flow NAME             Open the gallery of a flow
  --search TITLE          Open posts whose title matches
  --user NAME             Open posts by a user
  --config PATH           Read configuration from PATH
  --check-username NAME   Report whether a username is free and exit
  --version, -V           Show version and exit
  --help,    -h           Show this help message";

enum Command {
    Run(RunOptions),
    CheckUsername {
        name: String,
        config_file: Option<PathBuf>,
    },
    Version,
    Help,
}

fn main() {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    match command {
        Command::Version => println!("imgflow {}", imgflow::VERSION),
        Command::Help => println!("{USAGE}"),
        Command::CheckUsername { name, config_file } => {
            match app::check_username(&name, config_file) {
                Ok(Availability::Available) => println!("{name} is available"),
                Ok(Availability::Taken) => println!("{name} is taken"),
                Ok(_) => {
                    eprintln!("Could not check {name:?}.");
                    std::process::exit(1);
                }
                Err(err) => {
                    eprintln!("error: {err:?}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run(options) => {
            if let Err(err) = imgflow::run(options) {
                eprintln!("error: {err:?}");
                std::process::exit(1);
            }
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let mut options = RunOptions::default();
    let mut check_username = None;
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--flow" => options.scope = ResourceScope::Flow(value("--flow")?),
            "--search" => {
                options.scope = ResourceScope::Search {
                    title: value("--search")?,
                }
            }
            "--user" => options.scope = ResourceScope::User(value("--user")?),
            "--config" => options.config_file = Some(PathBuf::from(value("--config")?)),
            "--check-username" => check_username = Some(value("--check-username")?),
            other => return Err(format!("unknown argument {other:?}")),
        }
    }
    Ok(match check_username {
        Some(name) => Command::CheckUsername {
            name,
            config_file: options.config_file,
        },
        None => Command::Run(options),
    })
}
