// ABOUTME: Thread-safe map from envelope type tag to the decoder that rebuilds the typed store.
// ABOUTME: Lets one generic reader reconstruct many unrelated store types without knowing them statically.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::envelope::Envelope;
use crate::store::{PersistableStore, StoreError};

/// A decoded store with its concrete type erased. Callers downcast to the
/// type they bound their engine to.
pub type AnyStore = Box<dyn Any + Send>;

/// Decoder registered for one type tag.
pub type Resolver = Arc<dyn Fn(&[u8]) -> Result<AnyStore, StoreError> + Send + Sync>;

/// Errors raised while resolving an envelope into a store.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No decoder was registered for the tag. A wiring defect, never a data problem.
    #[error("no resolver registered for type tag {0:?}")]
    UnknownType(String),

    /// The decoder rejected the payload bytes.
    #[error("resolver for {tag:?} rejected payload: {source}")]
    Payload {
        tag: String,
        #[source]
        source: StoreError,
    },

    /// The tag resolved to a different Rust type than the caller expected.
    #[error("type tag {tag:?} resolved to a type other than {expected}")]
    TypeMismatch { tag: String, expected: &'static str },
}

impl ResolveError {
    /// Whether the error indicates broken bytes on disk (as opposed to a wiring bug).
    pub fn is_corruption(&self) -> bool {
        matches!(self, ResolveError::Payload { .. })
    }
}

/// Registry of resolvers keyed by type tag.
///
/// Owned by the persistence coordinator and shared with engines by `Arc`.
/// Registration may happen concurrently from several module constructors.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: RwLock<HashMap<String, Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the resolver for `type_tag`. Re-registering a tag
    /// with an equivalent decoder has no observable effect.
    pub fn register_resolver(&self, type_tag: impl Into<String>, resolver: Resolver) {
        let type_tag = type_tag.into();
        let mut resolvers = self.resolvers.write().unwrap_or_else(PoisonError::into_inner);
        if resolvers.insert(type_tag.clone(), resolver).is_some() {
            tracing::trace!(type_tag = %type_tag, "resolver re-registered");
        } else {
            tracing::debug!(type_tag = %type_tag, "resolver registered");
        }
    }

    /// Register `S::decode_payload` under `S::TYPE_TAG`.
    pub fn register<S: PersistableStore>(&self) {
        let resolver: Resolver =
            Arc::new(|payload: &[u8]| S::decode_payload(payload).map(|s| Box::new(s) as AnyStore));
        self.register_resolver(S::TYPE_TAG, resolver);
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the envelope's tag and run its decoder on the payload.
    pub fn decode(&self, envelope: &Envelope) -> Result<AnyStore, ResolveError> {
        // Clone the Arc so the decoder runs without holding the lock
        let resolver = self
            .resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.type_tag)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownType(envelope.type_tag.clone()))?;

        resolver(&envelope.payload).map_err(|source| ResolveError::Payload {
            tag: envelope.type_tag.clone(),
            source,
        })
    }

    /// Decode and downcast to the expected store type.
    pub fn decode_as<S: PersistableStore>(&self, envelope: &Envelope) -> Result<S, ResolveError> {
        let decoded = self.decode(envelope)?;
        decoded
            .downcast::<S>()
            .map(|boxed| *boxed)
            .map_err(|_| ResolveError::TypeMismatch {
                tag: envelope.type_tag.clone(),
                expected: std::any::type_name::<S>(),
            })
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resolvers = self.resolvers.read().unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<&String> = resolvers.keys().collect();
        tags.sort();
        f.debug_struct("ResolverRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{decode_json, encode_json};
    use serde::{Deserialize, Serialize};
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Alpha {
        name: String,
    }

    impl PersistableStore for Alpha {
        const TYPE_TAG: &'static str = "Alpha";
        fn encode_payload(&self) -> Result<Vec<u8>, StoreError> {
            encode_json(self)
        }
        fn decode_payload(payload: &[u8]) -> Result<Self, StoreError> {
            decode_json(payload)
        }
        fn get_clone(&self) -> Self {
            self.clone()
        }
        fn apply_persisted(&mut self, persisted: Self) {
            *self = persisted;
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Beta(u32);

    impl PersistableStore for Beta {
        const TYPE_TAG: &'static str = "Beta";
        fn encode_payload(&self) -> Result<Vec<u8>, StoreError> {
            encode_json(self)
        }
        fn decode_payload(payload: &[u8]) -> Result<Self, StoreError> {
            decode_json(payload)
        }
        fn get_clone(&self) -> Self {
            self.clone()
        }
        fn apply_persisted(&mut self, persisted: Self) {
            *self = persisted;
        }
    }

    #[test]
    fn decodes_registered_types() {
        let registry = ResolverRegistry::new();
        registry.register::<Alpha>();
        registry.register::<Beta>();

        let a = Alpha { name: "offer".into() };
        let b = Beta(42);

        let decoded_a: Alpha = registry.decode_as(&a.to_envelope().unwrap()).unwrap();
        let decoded_b: Beta = registry.decode_as(&b.to_envelope().unwrap()).unwrap();
        assert_eq!(decoded_a, a);
        assert_eq!(decoded_b, b);
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let registry = ResolverRegistry::new();
        registry.register::<Alpha>();
        registry.register::<Alpha>();

        assert_eq!(registry.len(), 1);
        let a = Alpha { name: "x".into() };
        let decoded: Alpha = registry.decode_as(&a.to_envelope().unwrap()).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn unknown_tag_is_a_distinct_error() {
        let registry = ResolverRegistry::new();
        let env = Envelope::new("Nobody", b"{}".to_vec());

        let err = registry.decode(&env).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownType(ref tag) if tag == "Nobody"));
        assert!(!err.is_corruption());
    }

    #[test]
    fn bad_payload_is_corruption() {
        let registry = ResolverRegistry::new();
        registry.register::<Beta>();
        let env = Envelope::new("Beta", b"\"not a number\"".to_vec());

        let err = registry.decode(&env).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn tag_bound_to_other_type_is_mismatch() {
        let registry = ResolverRegistry::new();
        // Deliberately miswire Beta's decoder under Alpha's tag
        registry.register_resolver(
            "Alpha",
            Arc::new(|p: &[u8]| Beta::decode_payload(p).map(|s| Box::new(s) as AnyStore)),
        );
        let env = Envelope::new("Alpha", b"7".to_vec());

        let err = registry.decode_as::<Alpha>(&env).unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn concurrent_registration() {
        let registry = Arc::new(ResolverRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        registry.register::<Alpha>();
                    } else {
                        registry.register::<Beta>();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("Alpha"));
        assert!(registry.contains("Beta"));
    }
}
