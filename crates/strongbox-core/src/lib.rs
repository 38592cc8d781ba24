// ABOUTME: Core library for strongbox, holding the types every other crate shares.
// ABOUTME: Defines the envelope wire format, the resolver registry, store categories and the store contract.

pub mod category;
pub mod envelope;
pub mod registry;
pub mod store;

pub use category::StoreCategory;
pub use envelope::{Envelope, EnvelopeError};
pub use registry::{AnyStore, ResolveError, Resolver, ResolverRegistry};
pub use store::{PersistableStore, StoreError, decode_json, encode_json};
