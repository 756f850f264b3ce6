//! Clinician account provisioning for LesionScope.
//!
//! Reads the password from stdin (one line), hashes it with Argon2id and
//! inserts the account into the database named by `LESIONSCOPE_DB_PATH`.
//!
//! # Usage
//!
//! ```bash
//! printf '%s\n' "$PASSWORD" | cargo run --bin create_user -- <username>
//! ```
//!
//! # Security
//!
//! - Password never appears on the command line or in logs
//! - Plaintext is zeroized from memory after hashing

use std::io::BufRead;

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use lesionscope::adapters::SqliteStore;
use lesionscope::config::ServerConfig;
use lesionscope::domain::password::hash_password;
use lesionscope::ports::RecordStore;

fn usage() -> String {
    "Usage: create_user <username>   (password is read from stdin)".to_string()
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let username = match (args.next(), args.next()) {
        (Some(arg), None) if arg == "-h" || arg == "--help" => bail!(usage()),
        (Some(username), None) if !username.trim().is_empty() => username,
        _ => bail!(usage()),
    };

    let mut password = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("Failed to read password from stdin")?;
    let trimmed = Zeroizing::new(password.trim_end_matches(['\n', '\r']).to_string());

    let hash = hash_password(&trimmed).context("Password rejected")?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let store = SqliteStore::new(&config.db_path, 1)
        .with_context(|| format!("Failed to open database {:?}", config.db_path))?;
    let id = store
        .insert_user(&username, &hash)
        .with_context(|| format!("Failed to create user {:?}", username.trim()))?;

    println!("Created user {:?} with id {id}", username.trim());
    Ok(())
}
