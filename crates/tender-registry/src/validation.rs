use itertools::Itertools;

use crate::error::FieldErrors;

pub const MAX_PASSWORD_LENGTH: usize = 512;

const MIN_UNIQUE_CHARACTERS: usize = 4;

const MAX_SIMILARITY: f64 = 0.7;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password12", "password123", "passw0rd", "p@ssw0rd", "12345678",
    "123456789", "1234567890", "87654321", "11111111", "00000000", "qwerty123", "qwertyuiop",
    "1q2w3e4r", "1qaz2wsx", "zaq12wsx", "iloveyou", "sunshine", "princess", "football",
    "baseball", "welcome1", "welcome123", "letmein1", "admin123", "administrator", "superman",
    "trustno1", "starwars", "whatever", "computer", "michelle", "jennifer", "abc12345",
    "abcd1234", "aa123456", "qwerty12", "asdfghjkl", "master123", "dragon123", "monkey123",
    "changeme", "secret123",
];

/// Adds a message when a required field is blank.
pub fn required(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "this field is required");
    }
}

pub fn max_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(
            field,
            format!("ensure this field has no more than {max} characters"),
        );
    }
}

pub fn email(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "this field is required");
    } else if !email_address::EmailAddress::is_valid(value) {
        errors.add(field, "enter a valid email address");
    }
}

/// State registry code of a company: 8 digits, or 10 for individual entrepreneurs.
pub fn edrpou(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    if !value.chars().all(|c| c.is_ascii_digit()) {
        errors.add(field, "EDRPOU must contain digits only");
    } else if value.len() != 8 && value.len() != 10 {
        errors.add(field, "EDRPOU must be 8 or 10 digits long");
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl PasswordPolicy {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    /// Every rule the password breaks, empty when it is acceptable.
    pub fn check(&self, password: &str, username: &str, email: &str) -> Vec<String> {
        let mut violations = Vec::new();
        let length = password.chars().count();
        if length < self.min_length {
            violations.push(format!(
                "this password is too short, it must contain at least {} characters",
                self.min_length
            ));
        }
        if length > MAX_PASSWORD_LENGTH {
            violations.push(format!(
                "this password is too long, it must contain at most {MAX_PASSWORD_LENGTH} characters"
            ));
        }
        if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
            violations.push("this password is entirely numeric".to_owned());
        }
        let lowered = password.to_lowercase();
        if COMMON_PASSWORDS.contains(&lowered.as_str()) {
            violations.push("this password is too common".to_owned());
        }
        let local_part = email.split('@').next().unwrap_or_default();
        // quadratic, so bounded to input that can still pass
        if length <= MAX_PASSWORD_LENGTH
            && [username, local_part]
                .into_iter()
                .filter(|attribute| attribute.len() <= MAX_PASSWORD_LENGTH)
                .any(|attribute| is_similar(&lowered, &attribute.to_lowercase()))
        {
            violations.push("this password is too similar to the username or email".to_owned());
        }
        if password.chars().unique().count() < MIN_UNIQUE_CHARACTERS {
            violations.push(format!(
                "this password must contain at least {MIN_UNIQUE_CHARACTERS} different characters"
            ));
        }
        violations
    }
}

fn is_similar(password: &str, attribute: &str) -> bool {
    if attribute.chars().count() < 3 {
        return false;
    }
    if password.contains(attribute) || attribute.contains(password) {
        return true;
    }
    similarity(password, attribute) >= MAX_SIMILARITY
}

/// Ratio of the longest common subsequence to the combined length, in `0.0..=1.0`.
fn similarity(a: &str, b: &str) -> f64 {
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut previous = vec![0usize; b.len() + 1];
    for x in &a {
        let mut current = vec![0usize; b.len() + 1];
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        previous = current;
    }
    let common = previous[b.len()];
    (2 * common) as f64 / (a.len() + b.len()) as f64
}
