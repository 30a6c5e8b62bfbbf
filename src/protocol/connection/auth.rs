//! Authentication plugins: the collaborator trait and the built-in methods.
//!
//! Plugins registered through `Opts::auth_plugins` are matched by name before
//! the built-ins, so they can add a method or replace one.

use auto_impl::auto_impl;

/// Turns a password and the server's seed into the bytes of an auth response.
#[auto_impl(&, Box, Arc)]
pub trait AuthPlugin: Send + Sync + std::fmt::Debug {
    /// Plugin name as announced by the server
    fn name(&self) -> &str;

    fn scramble(&self, password: &str, seed: &[u8]) -> Vec<u8>;
}

/// `mysql_native_password`
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePassword;

/// `caching_sha2_password`
#[derive(Debug, Clone, Copy, Default)]
pub struct CachingSha2Password;

impl AuthPlugin for NativePassword {
    fn name(&self) -> &str {
        "mysql_native_password"
    }

    fn scramble(&self, password: &str, seed: &[u8]) -> Vec<u8> {
        auth_mysql_native_password(password, trim_seed(seed)).to_vec()
    }
}

impl AuthPlugin for CachingSha2Password {
    fn name(&self) -> &str {
        "caching_sha2_password"
    }

    fn scramble(&self, password: &str, seed: &[u8]) -> Vec<u8> {
        auth_caching_sha2_password(password, trim_seed(seed)).to_vec()
    }
}

/// Look up a built-in plugin by the name the server announced.
pub fn find_plugin(name: &str) -> Option<&'static dyn AuthPlugin> {
    match name {
        "mysql_native_password" => Some(&NativePassword),
        "caching_sha2_password" => Some(&CachingSha2Password),
        _ => None,
    }
}

/// Auth switch requests append a NUL to the 20-byte seed.
fn trim_seed(seed: &[u8]) -> &[u8] {
    match seed.split_last() {
        Some((0, rest)) if rest.len() == 20 => rest,
        _ => seed,
    }
}

/// SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
pub fn auth_mysql_native_password(password: &str, seed: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};

    if password.is_empty() {
        return [0u8; 20];
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let token = hasher.finalize();

    let mut result = [0u8; 20];
    for (out, (a, b)) in result.iter_mut().zip(stage1.iter().zip(token.iter())) {
        *out = a ^ b;
    }
    result
}

/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)
pub fn auth_caching_sha2_password(password: &str, seed: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    if password.is_empty() {
        return [0u8; 32];
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(seed);
    let scramble = hasher.finalize();

    let mut result = [0u8; 32];
    for (out, (a, b)) in result.iter_mut().zip(stage1.iter().zip(scramble.iter())) {
        *out = a ^ b;
    }
    result
}
