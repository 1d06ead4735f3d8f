mod filter_input;

pub use filter_input::{FilterEvent, FilterInput};

/// How a component dealt with a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Consumed, nothing for the parent to do
  Handled,
  /// Consumed, and the parent should react to this
  Event(T),
  /// Not for this component
  NotHandled,
}
