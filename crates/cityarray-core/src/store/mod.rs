// ── Storage layer ──
//
// Reactive collections and the sign registry built on them.

mod collection;
mod registry;

pub use registry::SignRegistry;
