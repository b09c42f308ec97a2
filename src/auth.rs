use anyhow::{Result, bail};
use cryptic::SecureBytes;
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "CRYPTIC_PASSWORD";

fn into_secure(pw: Zeroizing<String>) -> Result<SecureBytes> {
    Ok(SecureBytes::from_slice(pw.as_bytes())?)
}

pub fn read_password() -> Result<SecureBytes> {
    //  CRYPTIC_PASSWORD="supersecret" cryptic decrypt notes.cryptic
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        let pw = Zeroizing::new(pw);
        if !pw.is_empty() {
            return into_secure(pw);
        }
    }

    //  printf "%s" "$SECRET" | cryptic decrypt notes.cryptic
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return into_secure(buf);
        }
    }

    if io::stdin().is_terminal() {
        let pw = Zeroizing::new(rpassword::prompt_password("Password: ")?);
        if !pw.is_empty() {
            return into_secure(pw);
        }
    }

    bail!("no password provided")
}

/// Reads a new password, asking twice on a terminal.
pub fn read_new_password_with_confirmation() -> Result<SecureBytes> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        let pw = Zeroizing::new(pw);
        if !pw.is_empty() {
            return into_secure(pw);
        }
    }

    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw = Zeroizing::new(String::new());
        handle.read_line(&mut pw)?;
        trim_newline(&mut pw);

        if pw.is_empty() {
            bail!("password cannot be empty");
        }
        return into_secure(pw);
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1 != pw2 {
        bail!("passwords do not match");
    }

    into_secure(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
