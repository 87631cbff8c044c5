#[cfg(test)]
mod tests {
    use crate::*;

    fn sample_script(args: Vec<u8>) -> Script {
        Script::new([0x11; 32], HashType::Data1.as_u8(), args)
    }

    #[test]
    fn test_script_encoding_layout() {
        let script = sample_script(vec![1, 2, 3]);
        let bytes = script.to_bytes();
        // header (16) + code_hash (32) + hash_type (1) + fixvec (4 + 3)
        assert_eq!(bytes.len(), 56);
        assert_eq!(&bytes[0..4], &56u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &16u32.to_le_bytes());
        assert_eq!(bytes[48], HashType::Data1.as_u8());
        assert_eq!(Script::from_slice(&bytes).unwrap(), script);
    }

    #[test]
    fn test_script_rejects_size_mismatch() {
        let mut bytes = sample_script(vec![0, 0]).to_bytes();
        bytes.push(0);
        assert!(matches!(
            Script::from_slice(&bytes),
            Err(EncodingError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_script_rejects_short_buffers() {
        assert!(Script::from_slice(&[]).is_err());
        assert!(Script::from_slice(&[4, 0, 0, 0]).is_err());
        assert!(Script::from_slice(&[6, 0, 0, 0, 8, 0]).is_err());
    }

    #[test]
    fn test_script_rejects_extra_fields() {
        // Four-field table: header 20 bytes.
        let mut bytes = Vec::new();
        let total: u32 = 20 + 32 + 1 + 4;
        bytes.extend_from_slice(&total.to_le_bytes());
        for off in [20u32, 52, 53, 57] {
            bytes.extend_from_slice(&off.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.push(0);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(bytes.len(), total as usize);
        assert_eq!(
            Script::from_slice(&bytes),
            Err(EncodingError::FieldCount { expected: 3, found: 4 })
        );
    }

    #[test]
    fn test_script_rejects_bad_field_sizes() {
        let mut bytes = sample_script(vec![9, 9]).to_bytes();
        // Shift the hash_type offset so code_hash becomes 31 bytes.
        bytes[8..12].copy_from_slice(&47u32.to_le_bytes());
        assert!(matches!(
            Script::from_slice(&bytes),
            Err(EncodingError::FieldSize { field: "code_hash", .. })
        ));
    }

    #[test]
    fn test_script_rejects_args_count_mismatch() {
        let mut bytes = sample_script(vec![9, 9, 9]).to_bytes();
        let args_at = 16 + 32 + 1;
        bytes[args_at..args_at + 4].copy_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            Script::from_slice(&bytes),
            Err(EncodingError::FieldSize { field: "args", .. })
        ));
    }

    #[test]
    fn test_script_rejects_decreasing_offsets() {
        let mut bytes = sample_script(vec![]).to_bytes();
        bytes[12..16].copy_from_slice(&40u32.to_le_bytes());
        assert!(matches!(Script::from_slice(&bytes), Err(EncodingError::Header(_))));
    }

    #[test]
    fn test_arguments_own_cell() {
        let args = ScriptArguments::parse(&[0x00, 0x00]).unwrap();
        assert_eq!(args.code, CodeLocation::OwnCell);
        assert!(!args.flags.file_system());
    }

    #[test]
    fn test_arguments_flags_are_little_endian() {
        let args = ScriptArguments::parse(&[0x01, 0x00]).unwrap();
        assert!(args.flags.file_system());
        let args = ScriptArguments::parse(&[0x00, 0x01]).unwrap();
        assert_eq!(args.flags, LoaderFlags(0x0100));
        assert!(!args.flags.file_system());
    }

    #[test]
    fn test_arguments_dependency() {
        let hash = [0xab; 32];
        let raw = ScriptArguments::dependency(0, &hash, HashType::Type);
        assert_eq!(raw.len(), 35);
        let args = ScriptArguments::parse(&raw).unwrap();
        assert_eq!(
            args.code,
            CodeLocation::Dependency { code_hash: hash, hash_type: HashType::Type }
        );
    }

    #[test]
    fn test_arguments_trailing_bytes_ignored() {
        let mut raw = ScriptArguments::dependency(0, &[1; 32], HashType::Data);
        raw.extend_from_slice(b"extra");
        assert!(matches!(
            ScriptArguments::parse(&raw).unwrap().code,
            CodeLocation::Dependency { .. }
        ));
    }

    #[test]
    fn test_arguments_too_short() {
        assert_eq!(ScriptArguments::parse(&[]), Err(ArgumentsError::MissingFlags(0)));
        assert_eq!(ScriptArguments::parse(&[1]), Err(ArgumentsError::MissingFlags(1)));
    }

    #[test]
    fn test_arguments_truncated_hash_is_rejected() {
        for len in 3..35 {
            let raw = vec![0u8; len];
            assert_eq!(
                ScriptArguments::parse(&raw),
                Err(ArgumentsError::TruncatedHash(len)),
                "length {len}"
            );
        }
    }

    #[test]
    fn test_arguments_unknown_hash_type() {
        let mut raw = ScriptArguments::dependency(0, &[0; 32], HashType::Data);
        raw[34] = 3;
        assert_eq!(ScriptArguments::parse(&raw), Err(ArgumentsError::UnknownHashType(3)));
    }

    #[test]
    fn test_hash_type_roundtrip() {
        for ht in [HashType::Data, HashType::Type, HashType::Data1, HashType::Data2] {
            assert_eq!(HashType::from_u8(ht.as_u8()), Some(ht));
        }
        assert_eq!(HashType::from_u8(3), None);
        assert!(!HashType::Type.matches_data());
        assert!(HashType::Data2.matches_data());
    }

    #[test]
    fn test_source_raw_values() {
        assert_eq!(Source::CellDep.raw(), 3);
        assert_eq!(Source::GroupInput.raw(), 0x0100_0000_0000_0001);
        for s in [
            Source::Input,
            Source::Output,
            Source::CellDep,
            Source::HeaderDep,
            Source::GroupInput,
            Source::GroupOutput,
        ] {
            assert_eq!(Source::from_raw(s.raw()), Some(s));
            assert_eq!(Source::from_name(s.name()), Some(s));
        }
        assert_eq!(Source::from_raw(0), None);
    }

    #[test]
    fn test_bounds() {
        let data = b"0123456789";
        assert_eq!(Bounds::WHOLE.apply(data), Some(&data[..]));
        assert_eq!(Bounds::new(2, 3).apply(data), Some(&b"234"[..]));
        assert_eq!(Bounds::new(8, 0).apply(data), Some(&b"89"[..]));
        assert_eq!(Bounds::new(8, 5).apply(data), None);
        assert_eq!(Bounds::new(11, 0).apply(data), None);
        assert_eq!(Bounds::from_raw(Bounds::new(7, 9).raw()), Bounds::new(7, 9));
    }

    #[test]
    fn test_syscall_error_mapping() {
        assert_eq!(SyscallError::from_code(codes::SUCCESS), None);
        assert_eq!(SyscallError::from_code(1), Some(SyscallError::NotFound));
        assert_eq!(SyscallError::from_code(2), Some(SyscallError::NotFound));
        assert_eq!(SyscallError::from_code(6), Some(SyscallError::InvalidArgument));
        assert_eq!(SyscallError::from_code(7), Some(SyscallError::Closed));
        assert_eq!(SyscallError::from_code(9), Some(SyscallError::OutOfMemory));
        assert_eq!(SyscallError::from_code(10), Some(SyscallError::WouldBlock));
        assert_eq!(SyscallError::from_code(77), Some(SyscallError::Unknown(77)));
        assert!(SyscallError::check(0).is_ok());
        assert_eq!(SyscallError::check(7), Err(SyscallError::Closed));
    }

    #[test]
    fn test_syscall_error_code_roundtrip() {
        for err in [
            SyscallError::NotFound,
            SyscallError::InvalidArgument,
            SyscallError::OutOfMemory,
            SyscallError::WouldBlock,
            SyscallError::Closed,
            SyscallError::Unknown(99),
        ] {
            assert_eq!(SyscallError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn test_loader_fault_codes_are_negative_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for fault in LoaderFault::ALL {
            let code = fault.exit_code();
            assert!(code < -5, "{fault} collides with runtime statuses");
            assert!(seen.insert(code));
            assert_eq!(LoaderFault::from_exit_code(code), Some(fault));
        }
    }

    #[test]
    fn test_script_json_uses_hex() {
        let script = sample_script(vec![0xde, 0xad]);
        let json = serde_json::to_string(&script).unwrap();
        assert!(json.contains("\"0xdead\""));
        let back: Script = serde_json::from_str(&json).unwrap();
        assert_eq!(back, script);
    }
}
