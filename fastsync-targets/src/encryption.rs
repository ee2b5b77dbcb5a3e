use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Installs the aws-lc-rs rustls provider used by the warehouse http clients.
///
/// Safe to call from every builder; only the first call installs the provider. A provider
/// installed earlier by the process is kept.
pub fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("a rustls crypto provider was already installed");
        }
    });
}
