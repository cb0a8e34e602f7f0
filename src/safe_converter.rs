//! Integer conversions between wire widths and `usize`.

/// Widening conversions that can never lose information on the platforms we support.
pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

#[cfg(not(target_pointer_width = "16"))]
impl SafeCast<usize> for u32 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<usize> for u16 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

/// For narrowing casts where a length was validated before (payload size limits, fixed
///  token size etc.).
///
/// NB: panics if the value does not fit, since that means a length check is missing
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}

macro_rules! prechecked_impl {
    ($from: ty, $to: ty) => {
        impl PrecheckedCast<$to> for $from {
            fn prechecked_cast(self) -> $to {
                <$to>::try_from(self)
                    .expect("this is a bug: length should have been validated before")
            }
        }
    }
}

prechecked_impl!(usize, u32);
prechecked_impl!(usize, u16);
