//! Registry trait for self-registering implementations.

/// Implemented by a marker type in each pluggable implementation module.
///
/// `NAME` is the key the implementation is configured under, e.g. `local` for
/// `[account.implementations.local]`.
pub trait ImplementationRegistry {
	const NAME: &'static str;

	/// Factory signature, defined by the crate owning the interface.
	type Factory;

	fn factory() -> Self::Factory;
}
