use bytes::{Buf, Bytes};
use crate::error::ApnsError;

macro_rules! checked_get_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self) -> Result<$ty, ApnsError> {
            if self.remaining() < std::mem::size_of::<$ty>() {
                return Err(ApnsError::Truncated);
            }
            Ok(self.$getter())
        }
    }
}

/// Reading from wire buffers that may be incomplete, reporting [ApnsError::Truncated]
///  instead of panicking
pub trait BufExt: Buf {
    checked_get_impl!(checked_get_u8, u8, get_u8);
    checked_get_impl!(checked_get_u16, u16, get_u16);
    checked_get_impl!(checked_get_u32, u32, get_u32);

    fn checked_get_bytes(&mut self, len: usize) -> Result<Bytes, ApnsError> {
        if self.remaining() < len {
            return Err(ApnsError::Truncated);
        }
        Ok(self.copy_to_bytes(len))
    }
}

impl <T: Buf> BufExt for T {
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_getters() {
        let mut buf: &[u8] = &[1, 0, 2, 0, 0, 0, 3, 9, 9];
        assert_eq!(buf.checked_get_u8().unwrap(), 1);
        assert_eq!(buf.checked_get_u16().unwrap(), 2);
        assert_eq!(buf.checked_get_u32().unwrap(), 3);
        assert!(matches!(buf.checked_get_u32(), Err(ApnsError::Truncated)));
        assert_eq!(buf.checked_get_bytes(2).unwrap().as_ref(), &[9, 9]);
        assert!(matches!(buf.checked_get_u8(), Err(ApnsError::Truncated)));
    }
}
