use log::*;

mod backup_error;

pub use backup_error::{BackendError, BackendErrorKind, BackupError, BackupResult, CryptoErrorKind};

//
// Encapsulation for the logger routines
// The file and line of the caller are placed in front of (or behind) the message,
// so the log4rs pattern does not need to carry them.
//
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        info!("[{}:{}] {}",  file!(), line!(), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        debug!("[{}:{}] {}",  file!(), line!(), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        error!("{} [{}:{}]", format!($($arg)*), file!(), line!());
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        warn!("{} [{}:{}]", format!($($arg)*), file!(), line!());
    };
}

/// Forward an error, only logging the place where it went through
#[macro_export]
macro_rules! tr_fwd {
    () => {
        err_closure_fwd(format!("[{}:{}]", file!(), line!()).as_str())
    };
}

/// Forward an error, logging it with a message and the place where it went through
#[macro_export]
macro_rules! err_fwd {
    ($($arg:tt)*) => {
        err_closure_fwd(format!("{} [{}:{}]", format!($($arg)*).as_str(), file!(), line!()).as_str())
    };
}

/// Same as err_fwd but for the command line, the error goes to the standard error output
#[macro_export]
macro_rules! eprint_fwd {
    ($($arg:tt)*) => {
        eprint_closure_fwd(format!($($arg)*).as_str())
    };
}

pub fn err_closure_fwd<'a, T: std::fmt::Display>(msg: &'a str) -> Box<dyn Fn(T) -> T + 'a> {
    let lambda = move |e: T| {
        log_error!("[{}] - {}", e, msg);
        e
    };
    Box::new(lambda)
}

pub fn eprint_closure_fwd<'a, T: std::fmt::Display>(msg: &'a str) -> Box<dyn Fn(T) -> T + 'a> {
    let lambda = move |e: T| {
        eprintln!("💣 {} - {}", msg, e);
        e
    };
    Box::new(lambda)
}
