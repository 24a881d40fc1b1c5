//! Configured users and the state of their mail and index on disk.

use serde::Serialize;

use crate::config::Config;
use crate::index::index_path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStatus {
    pub name: String,
    pub mailbox: String,
    /// Whether `{source_dir}/{name}` exists.
    pub has_mail: bool,
    /// Whether a finished index file exists.
    pub indexed: bool,
}

pub fn user_statuses(config: &Config) -> Vec<UserStatus> {
    config
        .users
        .iter()
        .map(|u| UserStatus {
            name: u.name.clone(),
            mailbox: u.mailbox.clone(),
            has_mail: config.user_source_dir(&u.name).is_dir(),
            indexed: index_path(&config.index.persist_dir, &u.name).exists(),
        })
        .collect()
}

pub fn print_users(config: &Config) {
    println!("{:<16} {:<32} {:<6} INDEXED", "USER", "MAILBOX", "MAIL");
    for status in user_statuses(config) {
        println!(
            "{:<16} {:<32} {:<6} {}",
            status.name,
            status.mailbox,
            if status.has_mail { "yes" } else { "no" },
            if status.indexed { "yes" } else { "no" }
        );
    }
}
