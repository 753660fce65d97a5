use chrono::NaiveDate;
use sha2::{Digest, Sha256};

pub const SYNTHETIC_PREFIX: &str = "discovered:";

/// Lowercase, keep alphanumerics, collapse everything else into single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity key for articles that have no source link.
///
/// The same normalized title on the same discovery date always yields the
/// same key, so rediscovering a story on the same day is a duplicate while a
/// recurring headline on a later day is a new article.
pub fn synthetic_key(title: &str, discovered_on: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"|");
    hasher.update(discovered_on.format("%Y-%m-%d").to_string().as_bytes());
    format!("{}{:x}", SYNTHETIC_PREFIX, hasher.finalize())
}

pub fn is_synthetic(key: &str) -> bool {
    key.starts_with(SYNTHETIC_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn cosmetic_title_changes_collide() {
        let a = synthetic_key("Porto do Pecém amplia terminal!", day(4));
        let b = synthetic_key("  porto do PECÉM   amplia terminal ", day(4));
        assert_eq!(a, b);
        assert!(is_synthetic(&a));
    }

    #[test]
    fn different_days_do_not_collide() {
        let a = synthetic_key("Porto do Pecém amplia terminal", day(4));
        let b = synthetic_key("Porto do Pecém amplia terminal", day(5));
        assert_ne!(a, b);
    }
}
