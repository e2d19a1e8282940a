/// Process-wide defaults shared by the server and client crates.
///
/// Mirrors the style of a small, `Copy`able options struct with an explicit
/// `Default` impl rather than a builder, matching how this kind of knob
/// bundle tends to be expressed in this codebase's backend layer.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Default TCP port the server binds and the client connects to when none
    /// is given explicitly. `23096` in the original implementation.
    pub default_port: u16,
    /// `request_timeout` advertised by a client proxy when none is given
    /// explicitly (spec.md §4.6, §5).
    pub default_request_timeout_secs: u32,
    /// Listen backlog used by the accept loop (spec.md §4.5: "listens with a
    /// small backlog").
    pub listen_backlog: i32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_port: 23096,
            default_request_timeout_secs: 30,
            listen_backlog: 16,
        }
    }
}

/// `true` if `cluster_size` is a positive multiple of `lba_size`, i.e. a
/// valid `lba_size * cluster_multiplier` product (spec.md GLOSSARY).
pub fn is_valid_cluster_size(cluster_size: u32, lba_size: u32) -> bool {
    lba_size > 0 && cluster_size > 0 && cluster_size % lba_size == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_matches_original() {
        assert_eq!(Options::default().default_port, 23096);
    }

    #[test]
    fn cluster_size_must_be_multiple_of_lba_size() {
        assert!(is_valid_cluster_size(4096, 512));
        assert!(!is_valid_cluster_size(4000, 512));
        assert!(!is_valid_cluster_size(4096, 0));
        assert!(!is_valid_cluster_size(0, 512));
    }
}
