use rand::Rng;
use rand::distr::Alphanumeric;

/// Текущее Unix-время в наносекундах.
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    now_nanos() / 1_000_000
}

/// Случайная alphanumeric строка заданной длины (для имён topic'ов и подписок).
pub fn random_name(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_name_has_requested_length() {
        let name = random_name(7);
        assert_eq!(name.len(), 7);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn clocks_agree() {
        let ms = now_ms();
        let ns = now_nanos();
        assert!((ns / 1_000_000 - ms).abs() < 1_000);
    }
}
