//! Short status lines for the user, mirrored into the log.

use std::fmt::Display;

pub fn success(message: impl Display) {
    log::info!("{}", message);
    eprintln!("[ok] {}", message);
}

pub fn warning(message: impl Display) {
    log::warn!("{}", message);
    eprintln!("[!] {}", message);
}

pub fn error(message: impl Display) {
    log::error!("{}", message);
    eprintln!("[error] {}", message);
}
