use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

impl Strength {
    /// Rates a candidate password. An empty password has no rating.
    ///
    /// One point each for reaching 6 and 8 characters, an uppercase letter,
    /// a digit, and anything that isn't an ASCII letter or digit.
    pub fn of(password: &str) -> Option<Self> {
        if password.is_empty() {
            return None;
        }

        let len = password.chars().count();
        let score = [
            len >= 6,
            len >= 8,
            password.chars().any(|c| c.is_ascii_uppercase()),
            password.chars().any(|c| c.is_ascii_digit()),
            password.chars().any(|c| !c.is_ascii_alphanumeric()),
        ]
        .into_iter()
        .filter(|&point| point)
        .count();

        Some(match score {
            0..=2 => Self::Weak,
            3..=4 => Self::Medium,
            _ => Self::Strong,
        })
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Weak => "Weak password",
            Self::Medium => "Medium strength",
            Self::Strong => "Strong password!",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ratings() {
        assert_eq!(Strength::of(""), None);
        assert_eq!(Strength::of("abc"), Some(Strength::Weak));
        assert_eq!(Strength::of("abcdefgh"), Some(Strength::Weak));
        assert_eq!(Strength::of("password123"), Some(Strength::Medium));
        assert_eq!(Strength::of("Password123"), Some(Strength::Medium));
        assert_eq!(Strength::of("Password123!"), Some(Strength::Strong));
    }

    #[test]
    fn short_but_varied() {
        // uppercase, digit and symbol but under six characters
        assert_eq!(Strength::of("A1!"), Some(Strength::Medium));
        assert_eq!(Strength::of("A1!").map(Strength::describe), Some("Medium strength"));
    }
}
