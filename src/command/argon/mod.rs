mod error;

use argh::FromArgs;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};

pub use error::Error;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "argon",
    description = "Hash a password for the password authenticator (argon2id)"
)]
pub struct Options {
    #[argh(option, short = 'u')]
    /// when set, print a ready to paste `[[auth.password.authenticators.users]]` entry
    pub username: Option<String>,
}

pub struct Command {
    username: Option<String>,
}

impl Command {
    pub fn new(options: &Options) -> Self {
        Self {
            username: options.username.clone(),
        }
    }

    pub fn run(&self) -> Result<(), Error> {
        let password = rpassword::prompt_password("Input Password: ")?;
        if password.is_empty() {
            return Err(Error::Input("Empty passwords are always rejected".to_string()));
        }

        let hash = generate_password(&password)?;
        println!("{}", render(self.username.as_deref(), &hash));
        Ok(())
    }
}

fn generate_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(OsRng);

    let config = Params::default();
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, config);
    let hash = argon.hash_password(password.as_bytes(), &salt)?;

    Ok(hash.to_string())
}

fn render(username: Option<&str>, hash: &str) -> String {
    match username {
        Some(username) => format!(
            "[[auth.password.authenticators.users]]\nusername = \"{username}\"\npassword = \"{hash}\""
        ),
        None => hash.to_string(),
    }
}
