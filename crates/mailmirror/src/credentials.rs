//! Account passwords from the system keyring.
//!
//! A password credential without a password in `config.json` is looked up in
//! the platform's credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use anyhow::Context;
use keyring::Entry;
use mailmirror_core::{AccountConfig, Credential};
use tracing::debug;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailmirror";

/// Keyring user for an account's IMAP password.
fn credential_key(account: &AccountConfig) -> String {
    format!("{SERVICE_NAME}_imap_{}", account.key())
}

/// Retrieves the IMAP password of `account` from the keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn get_imap_password(account: &AccountConfig) -> keyring::Result<Option<String>> {
    let entry = Entry::new(SERVICE_NAME, &credential_key(account))?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => {
            debug!("No IMAP password found for {}", account.key());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Returns `account` with its password filled in from the keyring when the
/// config file left it out.
///
/// # Errors
///
/// Returns an error if the keyring fails or holds no password either.
pub fn resolve(mut account: AccountConfig) -> anyhow::Result<AccountConfig> {
    if let Credential::Password { password: None } = &account.credential {
        let password = get_imap_password(&account)
            .with_context(|| format!("reading keyring for {}", account.key()))?
            .with_context(|| format!("no password for {} in config or keyring", account.key()))?;
        account.credential = Credential::Password {
            password: Some(password),
        };
    }
    Ok(account)
}
