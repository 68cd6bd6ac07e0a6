use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use log::error;
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginAttempt {
    pub email: String,
    pub password: String,
    pub remember_me: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordReset {
    pub email: String,
    pub old_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

/// Stored form is `<salt>$<sha256 of salt and password>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let hash = digest(&salt, password);

    format!("{salt}${hash}")
}

pub fn verify_password(password: &str, pwhash: &str) -> bool {
    match pwhash.split_once('$') {
        Some((salt, hash)) => digest(salt, password) == hash,
        None => {
            error!("stored password hash has no salt");
            false
        }
    }
}

fn digest(salt: &str, password: &str) -> String {
    sha256::digest(format!("{salt}{password}"))
}

pub fn valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();

    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"))
        .is_match(email)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn password_hash_is_salted() {
        let a = hash_password("password123");
        let b = hash_password("password123");

        assert_ne!(a, b);
        assert!(!a.contains("password123"));
        assert!(verify_password("password123", &a));
        assert!(verify_password("password123", &b));
        assert!(!verify_password("password124", &a));
    }

    #[test]
    fn unsalted_hash_never_verifies() {
        assert!(!verify_password("x", &sha256::digest("x")));
    }

    #[test]
    fn email_shape() {
        assert!(valid_email("john@example.com"));
        assert!(valid_email("a.b+c@sub.example.co"));
        assert!(!valid_email("john@example"));
        assert!(!valid_email("john example@x.com"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("john@@example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn session_id_round_trips_through_text() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>(), Ok(id));
        assert_eq!("not-a-session".parse::<SessionId>(), Err(()));
    }
}
