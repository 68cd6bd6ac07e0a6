/// Rules that differ between deployments: how long passwords must be and
/// whether emails and usernames are compared case-insensitively when
/// checking for duplicates or logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub min_password_len: usize,
    pub email_case_insensitive: bool,
    pub username_case_insensitive: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_password_len: 6,
            email_case_insensitive: false,
            username_case_insensitive: true,
        }
    }
}

impl Policy {
    pub fn password_long_enough(&self, password: &str) -> bool {
        password.chars().count() >= self.min_password_len
    }
}

/// Compares two identifiers, optionally ignoring case.
pub fn same_key(a: &str, b: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        a.to_lowercase() == b.to_lowercase()
    } else {
        a == b
    }
}
