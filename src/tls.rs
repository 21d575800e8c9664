use std::sync::OnceLock;

/// Selects the rustls crypto provider once per process before the first `wss://` handshake.
///
/// rustls 0.23 panics on first use when more than one provider feature is enabled in the
/// dependency graph and none was installed. A provider installed elsewhere first wins.
pub fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
