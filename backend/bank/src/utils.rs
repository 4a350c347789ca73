use std::sync::LazyLock;

use rand::{RngCore, thread_rng};
use regex::Regex;
use sha2::{Digest, Sha256};

static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_]").unwrap());
static UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9- ]").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Lowercase, ascii-only, single spaced. Used for lenient keyword matching.
pub fn sanitize(input: &str) -> String {
    let s = UNDERSCORES.replace_all(input, " ");
    let s = UNSAFE.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").to_lowercase()
}

/// Trim and collapse whitespace without touching case or punctuation.
pub fn tidy(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_email(input: &str) -> Option<String> {
    let email = input.trim().to_lowercase();

    EMAIL.is_match(&email).then_some(email)
}

pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    thread_rng().fill_bytes(&mut buf);

    hex::encode(buf)
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());

    hex::encode(hasher.finalize())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }

    diff == 0
}
