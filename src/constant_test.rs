use crate::constant::{
    BinaryWidth, CAPABILITIES_ALWAYS_DISABLED, CAPABILITIES_ALWAYS_ENABLED,
    CAPABILITIES_CONFIGURABLE, CapabilityFlags, ColumnType, CommandByte,
};

#[test]
fn test_capability_flags_classification() {
    const ALL_FLAGS: u32 = 0xFFFFFFFF;

    let always_enabled = CAPABILITIES_ALWAYS_ENABLED;
    let configurable = CAPABILITIES_CONFIGURABLE;
    let always_disabled = CAPABILITIES_ALWAYS_DISABLED;

    assert!(
        always_enabled.intersection(configurable).is_empty(),
        "ALWAYS_ENABLED and CONFIGURABLE must not overlap"
    );
    assert!(
        always_enabled.intersection(always_disabled).is_empty(),
        "ALWAYS_ENABLED and ALWAYS_DISABLED must not overlap"
    );
    assert!(
        configurable.intersection(always_disabled).is_empty(),
        "CONFIGURABLE and ALWAYS_DISABLED must not overlap"
    );

    let union = always_enabled | configurable | always_disabled;
    assert_eq!(
        union.bits(),
        ALL_FLAGS,
        "Missing flags: 0x{:08X}",
        ALL_FLAGS & !union.bits()
    );

    assert!(always_enabled.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
    assert!(always_enabled.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
    assert!(configurable.contains(CapabilityFlags::CLIENT_COMPRESS));
    assert!(configurable.contains(CapabilityFlags::CLIENT_SSL));
    assert!(always_disabled.contains(CapabilityFlags::CLIENT_INTERACTIVE));
}

#[test]
fn test_column_type_round_trips_through_u8() {
    for id in 0u8..=255 {
        if let Some(ty) = ColumnType::from_u8(id) {
            assert_eq!(ty as u8, id);
        }
    }
    assert_eq!(ColumnType::from_u8(0x14), None);
    assert_eq!(ColumnType::from_u8(0x80), None);
}

#[test]
fn test_binary_width() {
    assert_eq!(ColumnType::MYSQL_TYPE_NULL.binary_width(), BinaryWidth::Fixed(0));
    assert_eq!(ColumnType::MYSQL_TYPE_YEAR.binary_width(), BinaryWidth::Fixed(2));
    assert_eq!(ColumnType::MYSQL_TYPE_INT24.binary_width(), BinaryWidth::Fixed(4));
    assert_eq!(ColumnType::MYSQL_TYPE_DOUBLE.binary_width(), BinaryWidth::Fixed(8));
    assert_eq!(
        ColumnType::MYSQL_TYPE_DATETIME.binary_width(),
        BinaryWidth::LengthPrefixed
    );
    assert_eq!(
        ColumnType::MYSQL_TYPE_NEWDECIMAL.binary_width(),
        BinaryWidth::LengthEncoded
    );
}

#[test]
fn test_comment_prefix_commands() {
    assert!(CommandByte::Query.accepts_comment());
    assert!(CommandByte::StmtPrepare.accepts_comment());
    assert!(CommandByte::InitDb.accepts_comment());
    assert!(!CommandByte::StmtExecute.accepts_comment());
    assert!(!CommandByte::StmtClose.expects_response());
}
