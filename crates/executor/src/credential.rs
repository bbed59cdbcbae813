use std::fmt;
use zeroize::Zeroizing;

/// Elevation secret. Wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct ElevationCredential(Zeroizing<String>);

impl ElevationCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The secret followed by a newline, as a password prompt expects it.
    pub(crate) fn stdin_line(&self) -> Zeroizing<Vec<u8>> {
        let mut line = Zeroizing::new(Vec::with_capacity(self.0.len() + 1));
        line.extend_from_slice(self.0.as_bytes());
        line.push(b'\n');
        line
    }
}

impl fmt::Debug for ElevationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ElevationCredential([REDACTED])")
    }
}
