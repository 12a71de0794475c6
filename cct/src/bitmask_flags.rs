use num_traits::{One, PrimInt};

/// Trait implemented by flag enums.
///
/// The enum's discriminant (via `#[repr(u8)]`) determines the bit index.
/// The backing integer type is chosen via the associated `Storage`.
pub trait FlagBitmask {
    type Storage: PrimInt;

    fn bit_index(&self) -> u8;

    fn mask(&self) -> Self::Storage {
        // Equivalent to: 1 << index
        // NOTE: Ensure your `bit_index()` is < number of bits in `Storage`.
        Self::Storage::one() << (self.bit_index() as usize)
    }
}

/// A small bitmask container used for collision flags, sweep state and behavior flags.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitmaskFlags<T: PrimInt> {
    pub bits: T,
}

impl<T: PrimInt> BitmaskFlags<T> {
    pub fn new(bits: T) -> Self {
        Self { bits }
    }

    /// Empty set.
    pub fn empty() -> Self {
        Self { bits: T::zero() }
    }

    /// Build a set from a list of tags.
    pub fn from_tags<U: FlagBitmask<Storage = T> + Copy>(tags: &[U]) -> Self {
        let mut flags = Self::empty();
        flags.add_many(tags);
        flags
    }

    // --- Single Tag Operations ---
    pub fn add<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits | tag.mask();
    }

    pub fn remove<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits & !tag.mask();
    }

    pub fn has<U: FlagBitmask<Storage = T>>(&self, tag: U) -> bool {
        (self.bits & tag.mask()) != T::zero()
    }

    /// Set or clear `tag` depending on `on`.
    pub fn set<U: FlagBitmask<Storage = T>>(&mut self, tag: U, on: bool) {
        if on {
            self.add(tag);
        } else {
            self.remove(tag);
        }
    }

    // --- Bulk Operations ---
    pub fn add_many<U: FlagBitmask<Storage = T> + Copy>(&mut self, tags: &[U]) {
        for &tag in tags {
            self.add(tag);
        }
    }

    pub fn remove_many<U: FlagBitmask<Storage = T> + Copy>(&mut self, tags: &[U]) {
        for &tag in tags {
            self.remove(tag);
        }
    }

    /// Merge every bit of `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        self.bits = self.bits | other.bits;
    }

    // --- Logic Gates ---
    pub fn has_all<U: FlagBitmask<Storage = T> + Copy>(&self, tags: &[U]) -> bool {
        if tags.is_empty() {
            return true;
        }
        let combined = tags.iter().fold(T::zero(), |acc, t| acc | t.mask());
        (self.bits & combined) == combined
    }

    pub fn has_any<U: FlagBitmask<Storage = T> + Copy>(&self, tags: &[U]) -> bool {
        if tags.is_empty() {
            return false;
        }
        let combined = tags.iter().fold(T::zero(), |acc, t| acc | t.mask());
        (self.bits & combined) != T::zero()
    }

    pub fn is_empty(&self) -> bool {
        self.bits == T::zero()
    }

    pub fn clear(&mut self) {
        self.bits = T::zero();
    }
}

/// Declare a bitmask-backed enum and implement `FlagBitmask` for it.
///
/// Example:
/// ```rust
/// cct::define_bitmask_flags!(QueryKind, u16, {
///     Static,
///     Dynamic,
/// });
/// ```
#[macro_export]
macro_rules! define_bitmask_flags {
    ($(#[$meta:meta])* $name:ident, $storage:ty, { $($(#[$vmeta:meta])* $variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant),*
        }

        impl $crate::bitmask_flags::FlagBitmask for $name {
            type Storage = $storage;

            fn bit_index(&self) -> u8 {
                *self as u8
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    define_bitmask_flags!(TestFlag, u8, { A, B, C });

    #[test]
    fn add_remove_and_query_single_tags() {
        let mut flags = BitmaskFlags::<u8>::empty();
        flags.add(TestFlag::B);
        assert!(flags.has(TestFlag::B));
        assert!(!flags.has(TestFlag::A));
        assert_eq!(flags.bits, 0b010);

        flags.remove(TestFlag::B);
        assert!(flags.is_empty());
    }

    #[test]
    fn set_toggles_according_to_argument() {
        let mut flags = BitmaskFlags::<u8>::empty();
        flags.set(TestFlag::C, true);
        assert!(flags.has(TestFlag::C));
        flags.set(TestFlag::C, false);
        assert!(!flags.has(TestFlag::C));
    }

    #[test]
    fn logic_gates_follow_set_semantics() {
        let flags = BitmaskFlags::<u8>::from_tags(&[TestFlag::A, TestFlag::C]);
        assert!(flags.has_all(&[TestFlag::A, TestFlag::C]));
        assert!(!flags.has_all(&[TestFlag::A, TestFlag::B]));
        assert!(flags.has_any(&[TestFlag::B, TestFlag::C]));
        assert!(!flags.has_any::<TestFlag>(&[]));
        assert!(flags.has_all::<TestFlag>(&[]));
    }

    #[test]
    fn merge_unions_bits() {
        let mut a = BitmaskFlags::<u8>::from_tags(&[TestFlag::A]);
        a.merge(BitmaskFlags::from_tags(&[TestFlag::C]));
        assert_eq!(a.bits, 0b101);
    }
}
