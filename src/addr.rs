use std::net::IpAddr;

/// One resolved address for a dial attempt.
///
/// `hostname` preserves the name as originally requested (used for SNI);
/// `host` is the resolved numeric address used for the socket itself. For
/// a literal-IP request the two are the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddrRecord {
    pub hostname: String,
    pub host: IpAddr,
    pub port: u16,
    pub family: AddressFamily,
    pub proto: i32,
    pub flags: i32,
}

impl AddrRecord {
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.host, self.port)
    }
}

/// Address family filter for a lookup: `0` means "any".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressFamily {
    #[default]
    Any,
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn matches(self, addr: IpAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::Inet => addr.is_ipv4(),
            AddressFamily::Inet6 => addr.is_ipv6(),
        }
    }
}

/// SHA-256 of the peer certificate in DER encoding, used for certificate
/// pinning independent of the trust-store verification path.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn new(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }

    /// Hash `der` and compare it against this pinned value.
    pub fn check(&self, der: &[u8]) -> Result<(), [u8; 32]> {
        use sha2::{Digest, Sha256};

        let actual: [u8; 32] = Sha256::digest(der).into();
        if actual == self.0 { Ok(()) } else { Err(actual) }
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_matches_known_digest() {
        let digest: [u8; 32] = {
            use sha2::{Digest, Sha256};
            Sha256::digest(b"hello").into()
        };
        let fp = Fingerprint::new(digest);
        assert!(fp.check(b"hello").is_ok());
    }

    #[test]
    fn fingerprint_mismatch_reports_actual() {
        let fp = Fingerprint::new([0u8; 32]);
        let err = fp.check(b"hello").unwrap_err();
        assert_ne!(err, [0u8; 32]);
    }

    #[test]
    fn address_family_matches() {
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        assert!(AddressFamily::Any.matches(v4));
        assert!(AddressFamily::Inet.matches(v4));
        assert!(!AddressFamily::Inet.matches(v6));
        assert!(AddressFamily::Inet6.matches(v6));
    }
}
