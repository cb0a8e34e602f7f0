use bytes::{Buf, BufMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use crate::error::ApnsError;
use crate::protocol::identifier::Identifier;

/// Status byte of an error response. Values APNs may add in the future map to `Unknown`.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromPrimitive, IntoPrimitive)]
pub enum StatusCode {
    NoError = 0,
    ProcessingError = 1,
    MissingDeviceToken = 2,
    MissingTopic = 3,
    MissingPayload = 4,
    InvalidTokenSize = 5,
    InvalidTopicSize = 6,
    InvalidPayloadSize = 7,
    InvalidToken = 8,
    /// APNs is going away for maintenance. The identifier is that of the last notification
    ///  that was processed successfully.
    Shutdown = 10,
    #[num_enum(default)]
    Unknown = 255,
}

impl StatusCode {
    /// `NoError` and `Shutdown` do not blame the write after the referenced identifier
    pub fn is_error(&self) -> bool {
        !matches!(self, StatusCode::NoError | StatusCode::Shutdown)
    }
}

/// The only message APNs ever sends to a provider.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ErrorResponse {
    pub status: StatusCode,
    /// last write that APNs accepted before the one `status` refers to
    pub identifier: Identifier,
}

impl ErrorResponse {
    pub const TAG: u8 = 8;
    pub const SERIALIZED_LEN: usize = 6;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(Self::TAG);
        buf.put_u8(self.status.into());
        buf.put_u32(self.identifier.to_raw());
    }

    /// Expects at least [ErrorResponse::SERIALIZED_LEN] bytes, consuming exactly that many
    pub fn deser(buf: &mut impl Buf) -> Result<ErrorResponse, ApnsError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(ApnsError::Truncated);
        }

        let tag = buf.get_u8();
        if tag != Self::TAG {
            return Err(ApnsError::MalformedErrorResponse { tag });
        }

        let status = StatusCode::from_primitive(buf.get_u8());
        let identifier = Identifier::from_raw(buf.get_u32());
        Ok(ErrorResponse { status, identifier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::no_error(vec![8, 0, 0, 0, 0, 1], StatusCode::NoError, 1)]
    #[case::invalid_token_size(vec![8, 5, 0, 0, 0, 2], StatusCode::InvalidTokenSize, 2)]
    #[case::shutdown(vec![8, 10, 0x12, 0x34, 0x56, 0x78], StatusCode::Shutdown, 0x1234_5678)]
    #[case::unknown(vec![8, 255, 0xff, 0xff, 0xff, 0xff], StatusCode::Unknown, u32::MAX)]
    #[case::unassigned_status(vec![8, 9, 0, 0, 0, 7], StatusCode::Unknown, 7)]
    fn test_deser(#[case] bytes: Vec<u8>, #[case] status: StatusCode, #[case] identifier: u32) {
        let mut buf: &[u8] = &bytes;
        let response = ErrorResponse::deser(&mut buf).unwrap();
        assert_eq!(response.status, status);
        assert_eq!(response.identifier, Identifier::from_raw(identifier));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_ser() {
        let mut buf = Vec::new();
        ErrorResponse { status: StatusCode::InvalidToken, identifier: Identifier::from_raw(0x0102_0304) }
            .ser(&mut buf);
        assert_eq!(buf, vec![8, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn test_deser_malformed_tag() {
        let mut buf: &[u8] = &[7, 0, 0, 0, 0, 1];
        match ErrorResponse::deser(&mut buf) {
            Err(ApnsError::MalformedErrorResponse { tag }) => assert_eq!(tag, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_deser_truncated() {
        let mut buf: &[u8] = &[8, 0, 0, 0, 1];
        assert!(matches!(ErrorResponse::deser(&mut buf), Err(ApnsError::Truncated)));
    }

    #[rstest]
    #[case(StatusCode::NoError, false)]
    #[case(StatusCode::Shutdown, false)]
    #[case(StatusCode::ProcessingError, true)]
    #[case(StatusCode::InvalidToken, true)]
    #[case(StatusCode::Unknown, true)]
    fn test_is_error(#[case] status: StatusCode, #[case] expected: bool) {
        assert_eq!(status.is_error(), expected);
    }
}
