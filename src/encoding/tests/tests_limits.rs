//! Decode failure paths: truncation and invalid tags.

#[cfg(test)]
mod tests {
    use crate::encoding::*;

    #[test]
    fn empty_buffer_is_eof() {
        assert!(matches!(
            decode_record(&[]),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn truncated_key_length_is_eof() {
        assert!(matches!(
            decode_record(&[0x05, 0x00]),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn truncated_key_bytes_is_eof() {
        // Claims a 5-byte key, provides 2.
        let buf = [0x05, 0x00, 0x00, 0x00, b'a', b'b'];
        assert!(matches!(
            decode_record(&buf),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn missing_tag_is_eof() {
        let buf = [0x01, 0x00, 0x00, 0x00, b'k'];
        assert!(matches!(
            decode_record(&buf),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn truncated_value_is_eof() {
        let mut buf = Vec::new();
        encode_record(b"k", Some(b"value"), &mut buf);
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            decode_record(&buf),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let buf = [0x01, 0x00, 0x00, 0x00, b'k', 0x07];
        assert!(matches!(
            decode_record(&buf),
            Err(EncodingError::InvalidTag(0x07))
        ));
    }

    #[test]
    fn short_integer_reads_are_eof() {
        assert!(matches!(
            read_u32(&[0x01]),
            Err(EncodingError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            read_u64(&[0x01, 0x02, 0x03]),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }
}
