use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;
use std::sync::Arc;

/// Approximate memory footprint of a value, in bytes, including owned heap
/// data.
///
/// Cached value types opt in by implementing this for themselves; the impls
/// below cover the standard shapes (scalars, strings, containers, smart
/// pointers) by following reachable references and summing their footprints.
/// Precision is best-effort; the estimate only feeds a gauge. The cache's
/// sampler fences off panics, so a misbehaving estimate cannot take the
/// process down.
pub trait Measurable {
  fn mem_size(&self) -> u64;
}

macro_rules! measurable_scalar {
  ($($ty:ty),* $(,)?) => {
    $(
      impl Measurable for $ty {
        #[inline]
        fn mem_size(&self) -> u64 {
          size_of::<$ty>() as u64
        }
      }
    )*
  };
}

measurable_scalar!(
  u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char, ()
);

impl Measurable for String {
  fn mem_size(&self) -> u64 {
    (size_of::<Self>() + self.capacity()) as u64
  }
}

impl<T: Measurable> Measurable for Option<T> {
  fn mem_size(&self) -> u64 {
    // Inline shell (discriminant or niche) plus the payload's own footprint.
    let shell = (size_of::<Self>() - size_of::<T>()) as u64;
    match self {
      Some(value) => shell + value.mem_size(),
      None => size_of::<Self>() as u64,
    }
  }
}

impl<T: Measurable> Measurable for Box<T> {
  fn mem_size(&self) -> u64 {
    size_of::<Self>() as u64 + T::mem_size(self)
  }
}

impl<T: Measurable> Measurable for Arc<T> {
  fn mem_size(&self) -> u64 {
    // Pointer plus the shared allocation's reference counts and payload.
    (size_of::<Self>() + 2 * size_of::<usize>()) as u64 + T::mem_size(self)
  }
}

impl<T: Measurable> Measurable for Vec<T> {
  fn mem_size(&self) -> u64 {
    size_of::<Self>() as u64 + self.iter().map(Measurable::mem_size).sum::<u64>()
  }
}

impl<K: Measurable, V: Measurable, S> Measurable for HashMap<K, V, S> {
  fn mem_size(&self) -> u64 {
    size_of::<Self>() as u64
      + self
        .iter()
        .map(|(key, value)| key.mem_size() + value.mem_size())
        .sum::<u64>()
  }
}

impl<K: Measurable, V: Measurable> Measurable for BTreeMap<K, V> {
  fn mem_size(&self) -> u64 {
    size_of::<Self>() as u64
      + self
        .iter()
        .map(|(key, value)| key.mem_size() + value.mem_size())
        .sum::<u64>()
  }
}

macro_rules! measurable_tuple {
  ($(($($name:ident : $idx:tt),+)),* $(,)?) => {
    $(
      impl<$($name: Measurable),+> Measurable for ($($name,)+) {
        fn mem_size(&self) -> u64 {
          0 $(+ self.$idx.mem_size())+
        }
      }
    )*
  };
}

measurable_tuple!(
  (A: 0),
  (A: 0, B: 1),
  (A: 0, B: 1, C: 2),
  (A: 0, B: 1, C: 2, D: 3),
);
