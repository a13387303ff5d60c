//! The certificate/keypair collaborator interface.
//!
//! The engine never persists certificate material itself; certificate-
//! bearing task kinds request and supply it during discover/apply through
//! the narrow [`Keystore`] contract. Keysets support rotation: one item is
//! the designated primary, the rest exist only to keep old material trusted
//! while it is phased out.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// An X.509 certificate in PEM form. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate(pub String);

/// A private key in PEM form. Opaque to the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(pub String);

// Deliberately keeps key material out of debug output.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(*)")
    }
}

/// A certificate/key pair in a [`Keyset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetItem {
    pub id: String,
    pub certificate: Certificate,
    pub private_key: Option<PrivateKey>,
}

/// A named set of certificate/key pairs with at most one primary.
///
/// The primary is the pair in active use; secondary items only provide
/// trust overlap during rotation. The single-primary invariant is upheld
/// by construction: there is one `primary` slot, not a per-item flag.
#[derive(Debug, Clone, Default)]
pub struct Keyset {
    items: BTreeMap<String, KeysetItem>,
    primary: Option<String>,
}

impl Keyset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item without touching the primary designation.
    pub fn insert(&mut self, item: KeysetItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// Insert an item and make it the primary, demoting any previous
    /// primary to a secondary trust entry.
    pub fn insert_primary(&mut self, item: KeysetItem) {
        self.primary = Some(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    pub fn remove(&mut self, id: &str) -> Option<KeysetItem> {
        if self.primary.as_deref() == Some(id) {
            self.primary = None;
        }
        self.items.remove(id)
    }

    pub fn primary(&self) -> Option<&KeysetItem> {
        self.primary.as_ref().and_then(|id| self.items.get(id))
    }

    /// All non-primary items, in id order.
    pub fn secondaries(&self) -> impl Iterator<Item = &KeysetItem> {
        self.items
            .values()
            .filter(|item| self.primary.as_deref() != Some(item.id.as_str()))
    }

    pub fn items(&self) -> impl Iterator<Item = &KeysetItem> {
        self.items.values()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The trust pool view of this keyset: primary certificate plus every
    /// secondary certificate.
    pub fn certificate_pool(&self) -> CertificatePool {
        CertificatePool {
            primary: self.primary().map(|item| item.certificate.clone()),
            secondary: self.secondaries().map(|item| item.certificate.clone()).collect(),
        }
    }
}

/// Read-only aggregate of one primary certificate plus zero or more
/// secondary certificates, exposed to templating and rendering code.
/// Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct CertificatePool {
    pub primary: Option<Certificate>,
    pub secondary: Vec<Certificate>,
}

impl CertificatePool {
    /// Every certificate in the pool, primary first.
    pub fn all(&self) -> Vec<&Certificate> {
        let mut certs = Vec::with_capacity(1 + self.secondary.len());
        if let Some(primary) = &self.primary {
            certs.push(primary);
        }
        certs.extend(&self.secondary);
        certs
    }

    /// Concatenated PEM text of the whole pool, primary first.
    ///
    /// An empty pool renders as the empty string; callers templating a
    /// possibly-absent pool can pass `Option<&CertificatePool>` through
    /// [`CertificatePool::as_string_opt`] instead of unwrapping.
    pub fn as_string(&self) -> String {
        let mut out = String::new();
        for cert in self.all() {
            out.push_str(&cert.0);
            if !cert.0.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    /// Template-friendly rendering of an optional pool.
    pub fn as_string_opt(pool: Option<&CertificatePool>) -> String {
        pool.map(CertificatePool::as_string).unwrap_or_default()
    }
}

/// The externally supplied keystore the engine calls into.
///
/// Implementations must be safe for concurrent use; tasks in the same wave
/// may hit the store simultaneously. Errors are provider-opaque.
pub trait Keystore: Send + Sync {
    /// Find a keyset by name, or `None` if it does not exist.
    fn find_keyset(&self, name: &str) -> anyhow::Result<Option<Keyset>>;

    /// Write a keypair to the store and make it the primary for `name`.
    fn store_keypair(
        &self,
        name: &str,
        id: &str,
        certificate: &Certificate,
        private_key: &PrivateKey,
    ) -> anyhow::Result<()>;

    /// Find the certificate pool for a keyset, or `None` if absent.
    fn find_certificate_pool(&self, name: &str) -> anyhow::Result<Option<CertificatePool>>;

    /// Add a non-primary trust entry to a keyset.
    fn add_cert(&self, name: &str, id: &str, certificate: &Certificate) -> anyhow::Result<()>;

    /// Delete one item from a keyset.
    fn delete_keyset_item(&self, name: &str, id: &str) -> anyhow::Result<()>;
}

/// A thread-safe in-memory [`Keystore`], for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    keysets: Mutex<BTreeMap<String, Keyset>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keystore for MemoryKeystore {
    fn find_keyset(&self, name: &str) -> anyhow::Result<Option<Keyset>> {
        let keysets = self.keysets.lock().unwrap();
        Ok(keysets.get(name).cloned())
    }

    fn store_keypair(
        &self,
        name: &str,
        id: &str,
        certificate: &Certificate,
        private_key: &PrivateKey,
    ) -> anyhow::Result<()> {
        let mut keysets = self.keysets.lock().unwrap();
        let keyset = keysets.entry(name.to_string()).or_default();
        keyset.insert_primary(KeysetItem {
            id: id.to_string(),
            certificate: certificate.clone(),
            private_key: Some(private_key.clone()),
        });
        Ok(())
    }

    fn find_certificate_pool(&self, name: &str) -> anyhow::Result<Option<CertificatePool>> {
        let keysets = self.keysets.lock().unwrap();
        Ok(keysets.get(name).map(Keyset::certificate_pool))
    }

    fn add_cert(&self, name: &str, id: &str, certificate: &Certificate) -> anyhow::Result<()> {
        let mut keysets = self.keysets.lock().unwrap();
        let keyset = keysets.entry(name.to_string()).or_default();
        keyset.insert(KeysetItem {
            id: id.to_string(),
            certificate: certificate.clone(),
            private_key: None,
        });
        Ok(())
    }

    fn delete_keyset_item(&self, name: &str, id: &str) -> anyhow::Result<()> {
        let mut keysets = self.keysets.lock().unwrap();
        if let Some(keyset) = keysets.get_mut(name) {
            keyset.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(pem: &str) -> Certificate {
        Certificate(format!("-----BEGIN CERTIFICATE-----\n{pem}\n-----END CERTIFICATE-----\n"))
    }

    #[test]
    fn at_most_one_primary() {
        let store = MemoryKeystore::new();
        let key = PrivateKey("key".into());

        store.store_keypair("ca", "1", &cert("one"), &key).unwrap();
        store.store_keypair("ca", "2", &cert("two"), &key).unwrap();

        let keyset = store.find_keyset("ca").unwrap().unwrap();
        assert_eq!(keyset.primary().unwrap().id, "2");
        // Rotation keeps the old primary around as a secondary trust entry.
        assert_eq!(keyset.secondaries().count(), 1);
    }

    #[test]
    fn pool_renders_primary_first() {
        let store = MemoryKeystore::new();
        let key = PrivateKey("key".into());

        store.add_cert("ca", "0", &cert("old")).unwrap();
        store.store_keypair("ca", "1", &cert("new"), &key).unwrap();

        let pool = store.find_certificate_pool("ca").unwrap().unwrap();
        assert_eq!(pool.all().len(), 2);
        let text = pool.as_string();
        assert!(text.find("new").unwrap() < text.find("old").unwrap());
    }

    #[test]
    fn absent_pool_renders_empty() {
        assert_eq!(CertificatePool::as_string_opt(None), "");
    }

    #[test]
    fn delete_primary_clears_designation() {
        let store = MemoryKeystore::new();
        let key = PrivateKey("key".into());

        store.store_keypair("ca", "1", &cert("one"), &key).unwrap();
        store.delete_keyset_item("ca", "1").unwrap();

        let keyset = store.find_keyset("ca").unwrap().unwrap();
        assert!(keyset.primary().is_none());
        assert!(keyset.is_empty());
    }

    #[test]
    fn missing_keyset_is_none_not_error() {
        let store = MemoryKeystore::new();
        assert!(store.find_keyset("nope").unwrap().is_none());
        assert!(store.find_certificate_pool("nope").unwrap().is_none());
    }
}
