//! Signing material for outbound probes.

pub mod keys;
pub mod token;

pub use keys::load_or_generate_keypair;
pub use token::TokenSigner;
