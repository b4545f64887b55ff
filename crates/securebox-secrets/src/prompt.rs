//! Terminal password prompts, kept out of the bundle store itself

use secrecy::{ExposeSecret, SecretString};

/// Ask once for the password of an existing bundle.
pub fn ask_password(prompt: &str) -> std::io::Result<SecretString> {
    rpassword::prompt_password(prompt).map(SecretString::from)
}

/// Ask twice for a new password. An empty answer means "store unencrypted".
pub fn ask_new_password() -> std::io::Result<SecretString> {
    loop {
        let first = ask_password("New bundle password (empty for none): ")?;
        if first.expose_secret().is_empty() {
            return Ok(first);
        }
        let second = ask_password("Repeat password: ")?;
        if first.expose_secret() == second.expose_secret() {
            return Ok(first);
        }
        eprintln!("Passwords do not match, try again.");
    }
}
