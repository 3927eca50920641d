use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 生成频道外部短标识, 字母数字随机串
pub fn generate(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// 外部短标识约束: 8-24 位字母数字
pub fn is_valid(uid: &str) -> bool {
    (8..=24).contains(&uid.len()) && uid.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_charset() {
        let uid = generate(8);
        assert_eq!(uid.len(), 8);
        assert!(is_valid(&uid));
    }

    #[test]
    fn test_is_valid_bounds() {
        assert!(!is_valid("short"));
        assert!(is_valid("abcd1234"));
        assert!(!is_valid("with-hyphen1"));
        assert!(!is_valid(&"x".repeat(25)));
    }
}
