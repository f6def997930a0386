use thiserror::Error;

/// Closed error taxonomy for vault and store operations.
///
/// Flow handlers match on these to produce user-facing replies; anything
/// outside this enum is reported generically and never shown verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("secret material is not a recognized private key or recovery phrase")]
    InvalidCredential,

    #[error("wallet with address {0} already exists")]
    DuplicateWallet(String),

    #[error("wallet limit reached ({0} max)")]
    LimitReached(usize),

    #[error("wallet not found: {0}")]
    NotFound(String),

    #[error("invalid wallet name")]
    InvalidName,

    #[error("cannot delete the only wallet")]
    LastWallet,

    #[error("failed to decrypt stored secret")]
    DecryptionFailed,

    #[error("concurrent modification detected")]
    Conflict,

    /// Cipher-level authentication failure. Always wrapped as
    /// `DecryptionFailed` before it reaches a flow.
    #[error("ciphertext integrity check failed")]
    Integrity,
}

impl VaultError {
    /// Short message safe to show to the end user. Never carries cipher
    /// detail or decrypted material.
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredential => {
                "That doesn't look like a valid private key or recovery phrase."
            }
            Self::DuplicateWallet(_) => "You already hold a wallet with that address.",
            Self::LimitReached(_) => "Wallet limit reached. Delete one before adding another.",
            Self::NotFound(_) => "That wallet no longer exists.",
            Self::InvalidName => {
                "Names must be 3-24 characters: letters, digits and single spaces."
            }
            Self::LastWallet => "You can't delete your only wallet.",
            Self::DecryptionFailed | Self::Integrity => {
                "Something went wrong reading that wallet. The team has been notified."
            }
            Self::Conflict => "That didn't go through. Please try again.",
        }
    }

    /// Integrity and decrypt failures indicate possible key rotation or data
    /// corruption and are logged as security-relevant events.
    pub const fn is_security_relevant(&self) -> bool {
        matches!(self, Self::Integrity | Self::DecryptionFailed)
    }
}
