//! Type erasure for values flowing through the interpreter.
//!
//! Effect descriptions are typed at the API surface but interpreted over a
//! single erased representation so that one run loop can evaluate every node.
//! The typed combinators guarantee that a value is only ever unerased at the
//! type it was erased with.

use super::cause::Cause;
use super::exit::Exit;
use std::any::{type_name, Any};
use std::sync::Arc;

/// Marker for types that can flow through effects.
///
/// Values may be replayed (an effect can run many times) and may cross fiber
/// boundaries, so they must be cloneable and thread-safe.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

/// The uninhabited error type of effects that cannot fail.
pub type Never = std::convert::Infallible;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;
pub(crate) type AnyCause = Cause<AnyValue>;
pub(crate) type AnyExit = Exit<AnyValue, AnyValue>;

pub(crate) fn erase<T: Value>(value: T) -> AnyValue {
    Arc::new(value)
}

/// Recovers a typed value, moving out when the erased box is uniquely owned.
///
/// # Panics
///
/// Panics on a type mismatch. The interpreter runs every continuation under
/// `catch_unwind`, so a mismatch surfaces as a defect rather than aborting.
pub(crate) fn unerase<T: Value>(value: AnyValue) -> T {
    match value.downcast::<T>() {
        Ok(typed) => Arc::try_unwrap(typed).unwrap_or_else(|shared| (*shared).clone()),
        Err(_) => panic!("effect value type mismatch: expected {}", type_name::<T>()),
    }
}

pub(crate) fn unit() -> AnyValue {
    erase(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_then_unerase() {
        let v = erase(vec![1, 2, 3]);
        let back: Vec<i32> = unerase(v);
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn shared_values_are_cloned() {
        let v = erase(String::from("shared"));
        let keep = Arc::clone(&v);
        let back: String = unerase(v);
        assert_eq!(back, "shared");
        assert_eq!(Arc::strong_count(&keep), 1);
    }

    #[test]
    #[should_panic(expected = "type mismatch")]
    fn mismatch_panics() {
        let _: u8 = unerase(erase("text"));
    }
}
