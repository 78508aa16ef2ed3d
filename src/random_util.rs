use std::fmt::Write;

use rand::RngCore;

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(&mut s, "{:02x}", byte).expect("writing to String");
    }
    s
}

/// `nbytes` random bytes from the thread rng, as lowercase hex.
pub fn random_hex(nbytes: usize) -> String {
    let mut buf = vec![0u8; nbytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex(&buf)
}

/// Like `random_hex` but straight from the OS, for key material.
pub fn os_random_hex(nbytes: usize) -> Result<String, getrandom::Error> {
    let mut buf = vec![0u8; nbytes];
    getrandom::getrandom(&mut buf)?;
    Ok(hex(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_random_hex() {
        let a = random_hex(32);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, random_hex(32));
        assert_eq!(random_hex(0), "");
    }

    #[test]
    fn t_os_random_hex() {
        let s = os_random_hex(6).unwrap();
        assert_eq!(s.len(), 12);
        assert_eq!(hex(&[0, 255, 16]), "00ff10");
    }
}
