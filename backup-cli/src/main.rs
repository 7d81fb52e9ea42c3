use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use anyhow::anyhow;
use log::*;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;

use commons_error::*;
use dkbackup::BackupOrchestrator;
use dkcatalog::MetadataCatalog;
use dkconfig::property_name::CONFIG_ENV_VAR;
use dkconfig::BackupConfig;
use dkstorage::{LocalFolderBackend, SharedBackend};

use crate::command_options::{display_commands, load_commands, parse_args, Command, Params, CONFIG_FLAG};
use crate::file_commands::{file_backup, file_info, file_list, file_restore, file_resume, file_verify};

mod command_options;
mod file_commands;

const PARAMETER_ERROR: u16 = 10;
const CONFIG_ERROR: u16 = 20;
const INIT_FAILED: u16 = 30;
const FILE_BACKUP_FAILED: u16 = 110;
const FILE_RESUME_FAILED: u16 = 120;
const FILE_RESTORE_FAILED: u16 = 130;
const FILE_INFO_FAILED: u16 = 140;
const FILE_LIST_FAILED: u16 = 150;
const FILE_VERIFY_FAILED: u16 = 160;
const SUCCESS: u16 = 0;

/// The configuration file is given by the -c option, or the DKB_CONFIG variable
fn read_configuration_file(params: &Params) -> anyhow::Result<BackupConfig> {
    let path = match extract_option(&params.options, CONFIG_FLAG)? {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(env::var(CONFIG_ENV_VAR).map_err(|_| {
            anyhow!(
                "💣 No configuration file, use the {} option or the {} variable",
                CONFIG_FLAG,
                CONFIG_ENV_VAR
            )
        })?),
    };
    BackupConfig::load(&path)
}

fn init_log(config: &BackupConfig) -> anyhow::Result<()> {
    match &config.log_config {
        Some(log_config) => {
            log4rs::init_file(log_config, Default::default())
                .map_err(|e| anyhow!("Cannot read the log4rs configuration, path=[{:?}], e=[{}]", log_config, e))?;
        }
        None => {
            let stdout = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}")))
                .build();
            let log_config = log4rs::Config::builder()
                .appender(Appender::builder().build("stdout", Box::new(stdout)))
                .build(Root::builder().appender("stdout").build(LevelFilter::Warn))?;
            log4rs::init_config(log_config)?;
        }
    }
    Ok(())
}

fn build_orchestrator(config: BackupConfig) -> anyhow::Result<BackupOrchestrator> {
    let catalog = Arc::new(MetadataCatalog::open(&config.catalog_path)?);
    let mut backends: Vec<SharedBackend> = vec![];
    for backend_config in &config.backends {
        let backend = LocalFolderBackend::new(&backend_config.name, &backend_config.path)?;
        backends.push(Arc::new(backend));
    }
    let orchestrator = BackupOrchestrator::new(config, catalog, backends)?;
    Ok(orchestrator)
}

fn extract_mandatory_option(options: &HashMap<String, Option<String>>, key: &str) -> anyhow::Result<String> {
    let opt_value = options
        .get(key)
        .ok_or_else(|| anyhow!("💣 Unknown parameter, option=[{}]", key))?;
    let value = opt_value
        .as_ref()
        .ok_or_else(|| anyhow!("💣 Unknown parameter, option=[{}]", key))?;
    Ok(value.to_owned())
}

fn extract_option(options: &HashMap<String, Option<String>>, key: &str) -> anyhow::Result<Option<String>> {
    let opt_value = options.get(key);
    match opt_value {
        None => Ok(None),
        Some(o_value) => Ok(o_value.to_owned()),
    }
}

fn extract_file_id(options: &HashMap<String, Option<String>>) -> anyhow::Result<i64> {
    let id = extract_mandatory_option(options, "-id")?;
    id.parse::<i64>()
        .map_err(|_| anyhow!("💣 The file id must be a number, id=[{}]", id))
}

fn dispatch(params: &Params, orchestrator: &BackupOrchestrator) -> u16 {
    match (params.object.as_str(), params.action.as_str()) {
        ("file", "backup") => {
            let Ok(path) = extract_mandatory_option(&params.options, "-pt").map_err(eprint_fwd!("Error")) else {
                return PARAMETER_ERROR;
            };
            let err = file_backup(orchestrator, &path).map_err(eprint_fwd!("Backup failed"));
            success_or_err(err, FILE_BACKUP_FAILED)
        }
        ("file", "resume") => {
            let Ok((file_id, o_path)) = (|| -> anyhow::Result<(i64, Option<String>)> {
                Ok((
                    extract_file_id(&params.options)?,
                    extract_option(&params.options, "-pt")?,
                ))
            })()
            .map_err(eprint_fwd!("Error")) else {
                return PARAMETER_ERROR;
            };
            let err = file_resume(orchestrator, file_id, o_path.as_deref()).map_err(eprint_fwd!("Resume failed"));
            success_or_err(err, FILE_RESUME_FAILED)
        }
        ("file", "restore") => {
            let Ok((file_id, path)) = (|| -> anyhow::Result<(i64, String)> {
                Ok((
                    extract_file_id(&params.options)?,
                    extract_mandatory_option(&params.options, "-pt")?,
                ))
            })()
            .map_err(eprint_fwd!("Error")) else {
                return PARAMETER_ERROR;
            };
            let err = file_restore(orchestrator, file_id, &path).map_err(eprint_fwd!("Restore failed"));
            success_or_err(err, FILE_RESTORE_FAILED)
        }
        ("file", "info") => {
            let Ok(file_id) = extract_file_id(&params.options).map_err(eprint_fwd!("Error")) else {
                return PARAMETER_ERROR;
            };
            let json = params.options.contains_key("-j");
            let err = file_info(orchestrator, file_id, json).map_err(eprint_fwd!("Info failed"));
            success_or_err(err, FILE_INFO_FAILED)
        }
        ("file", "list") => {
            let err = file_list(orchestrator).map_err(eprint_fwd!("List failed"));
            success_or_err(err, FILE_LIST_FAILED)
        }
        ("file", "verify") => {
            let Ok(file_id) = extract_file_id(&params.options).map_err(eprint_fwd!("Error")) else {
                return PARAMETER_ERROR;
            };
            let err = file_verify(orchestrator, file_id).map_err(eprint_fwd!("Verify failed"));
            success_or_err(err, FILE_VERIFY_FAILED)
        }
        (_, _) => PARAMETER_ERROR,
    }
}

fn success_or_err(err: anyhow::Result<()>, err_code: u16) -> u16 {
    if err.is_err() {
        err_code
    } else {
        SUCCESS
    }
}

///
/// dkb [object] [action] [options]
///
fn main() {
    println!("dkb version 0.3.0");

    let args: Vec<String> = env::args().collect();
    let commands: Vec<Command> = match load_commands() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("💣 Cannot load the commands, err=[{}]", e);
            exit_program(PARAMETER_ERROR as i32);
        }
    };

    let params = match parse_args(&args, &commands) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("💣 Error while parsing the arguments, err=[{}]", e);
            display_commands(&commands);
            exit_program(PARAMETER_ERROR as i32);
        }
    };

    if (params.object.as_str(), params.action.as_str()) == ("help", "help") {
        display_commands(&commands);
        exit_program(SUCCESS as i32);
    }

    let config = match read_configuration_file(&params) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("💣 Error while reading the configuration file, err=[{}]", e);
            exit_program(CONFIG_ERROR as i32);
        }
    };

    if let Err(e) = init_log(&config) {
        eprintln!("💣 Cannot initialize the logs, err=[{}]", e);
        exit_program(CONFIG_ERROR as i32);
    }

    log_info!("🚀 Start dkb, command=[{} {}]", &params.object, &params.action);
    log_info!("Configuration loaded, {}", config.summary());

    let orchestrator = match build_orchestrator(config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("💣 Cannot open the catalog or the backends, err=[{}]", e);
            exit_program(INIT_FAILED as i32);
        }
    };

    let exit_code = dispatch(&params, &orchestrator);
    log_info!("🏁 End of dkb, exit_code=[{}]", exit_code);
    exit_program(exit_code as i32);
}

fn exit_program(code: i32) -> ! {
    println!("Terminated [{}]", code);
    exit(code)
}
