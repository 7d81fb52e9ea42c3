use std::collections::HashMap;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// The configuration file, accepted by every command
pub(crate) const CONFIG_FLAG: &str = "-c";

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct CommandOption {
    description: String,
    flags: Vec<String>,
    required: bool,
    #[serde(rename = "hasValue")]
    has_value: bool,
    key: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct Subcommand {
    name: String,
    description: String,
    options: Vec<CommandOption>,
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct Command {
    name: String,
    sub: Vec<Subcommand>,
}

#[derive(Debug)]
pub(crate) struct Params {
    pub object: String,
    pub action: String,
    pub options: HashMap<String, Option<String>>,
}

pub(crate) fn load_commands() -> anyhow::Result<Vec<Command>> {
    let command_str = include_str!("../commands.json");
    let commands: Vec<Command> = serde_json::from_str(command_str)?;
    Ok(commands)
}

///
/// dkb [object] [action] [options]
///
pub(crate) fn parse_args(args: &[String], commands: &[Command]) -> anyhow::Result<Params> {
    if args.len() < 3 {
        return Err(anyhow!("Not enough arguments"));
    }

    let object = args[1].clone();
    let action = args[2].clone();
    let subcommand = find_subcommand(commands, &object, &action)?;

    let mut options: HashMap<String, Option<String>> = HashMap::new();
    let mut i = 3;
    while i < args.len() {
        let option_name = args[i].clone();
        i += 1;

        let has_value = if option_name == CONFIG_FLAG {
            true
        } else {
            subcommand
                .options
                .iter()
                .find(|opt| opt.flags.contains(&option_name))
                .ok_or_else(|| anyhow!("Unknown option, option=[{}], command=[{} {}]", &option_name, &object, &action))?
                .has_value
        };

        let option_value = if has_value {
            let v = args
                .get(i)
                .ok_or_else(|| anyhow!("Missing value, option=[{}]", &option_name))?
                .clone();
            i += 1;
            Some(v)
        } else {
            None
        };
        options.insert(option_name, option_value);
    }

    for opt in subcommand.options.iter().filter(|o| o.required) {
        if !opt.flags.iter().any(|f| options.contains_key(f)) {
            return Err(anyhow!("Missing option, option=[{}]", opt.flags.join("|")));
        }
    }

    Ok(Params { object, action, options })
}

fn find_subcommand<'a>(commands: &'a [Command], command_name: &str, subcommand_name: &str) -> anyhow::Result<&'a Subcommand> {
    let command = commands
        .iter()
        .find(|cmd| cmd.name == command_name)
        .ok_or_else(|| anyhow!("Command {} not found", command_name))?;

    command
        .sub
        .iter()
        .find(|subcmd| subcmd.name == subcommand_name)
        .ok_or_else(|| anyhow!("Subcommand {} not found in command {}", subcommand_name, command_name))
}

pub(crate) fn display_commands(commands: &[Command]) {
    println!("Usage: dkb <object> <action> [options] [-c <config file>]");
    for command in commands {
        for sub in &command.sub {
            println!();
            println!("  {} {} : {}", command.name, sub.name, sub.description);
            for opt in &sub.options {
                println!(
                    "      {}{}\t{}{}",
                    opt.flags.join("|"),
                    if opt.has_value { format!(" <{}>", opt.key) } else { String::new() },
                    opt.description,
                    if opt.required { " (required)" } else { "" }
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::command_options::{load_commands, parse_args};

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn get_data() {
        let commands = load_commands().unwrap();
        assert_eq!(2, commands.len());
    }

    #[test]
    fn parse_options() {
        let commands = load_commands().unwrap();

        let params = parse_args(&args("dkb file info -id 12 -j -c /etc/dkb.properties"), &commands).unwrap();
        assert_eq!("file", params.object);
        assert_eq!("info", params.action);
        assert_eq!(Some(&Some("12".to_string())), params.options.get("-id"));
        assert_eq!(Some(&None), params.options.get("-j"));
        assert_eq!(Some(&Some("/etc/dkb.properties".to_string())), params.options.get("-c"));
    }

    #[test]
    fn parse_errors() {
        let commands = load_commands().unwrap();
        // missing required option
        assert!(parse_args(&args("dkb file restore -id 3"), &commands).is_err());
        // unknown option
        assert!(parse_args(&args("dkb file list -x"), &commands).is_err());
        // missing value
        assert!(parse_args(&args("dkb file backup -pt"), &commands).is_err());
        // unknown command
        assert!(parse_args(&args("dkb item create"), &commands).is_err());
        assert!(parse_args(&args("dkb"), &commands).is_err());
    }
}
