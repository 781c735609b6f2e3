use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Random anti-forgery token drawn uniformly from `[A-Za-z0-9]`.
pub fn random_state(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Show only the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 8 {
        return "*".repeat(count.max(4));
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}
