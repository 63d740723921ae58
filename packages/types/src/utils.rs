/// Canonical form used for every email comparison and every stored email.
#[inline]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[inline]
pub fn emails_match(left: &str, right: &str) -> bool {
    normalize_email(left) == normalize_email(right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_trims_and_lowercases() {
        assert_eq!(normalize_email("  Buyer@Example.COM "), "buyer@example.com");
        assert!(emails_match("a@b.io", " A@B.io"));
        assert!(!emails_match("a@b.io", "a@c.io"));
    }
}
