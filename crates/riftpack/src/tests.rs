use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::*;

// ============================================================================
//  DESCRIPTORS
// ============================================================================

static POINT: StructDescriptor = StructDescriptor::new("Point", &[
    FieldDescriptor::required("x", 1, TypeDescriptor::I32),
    FieldDescriptor::required("y", 2, TypeDescriptor::I32),
]);

static POINT_TY: TypeDescriptor = TypeDescriptor::Struct(&POINT);

static SHAPE: StructDescriptor = StructDescriptor::new("Shape", &[
    FieldDescriptor::required("name", 1, TypeDescriptor::String),
    FieldDescriptor::optional("points", 2, TypeDescriptor::List(&POINT_TY)),
    FieldDescriptor::optional("labels", 3, TypeDescriptor::Map(&TypeDescriptor::String, &POINT_TY)),
    FieldDescriptor::optional("filled", 4, TypeDescriptor::Bool),
    FieldDescriptor::optional("tags", 5, TypeDescriptor::Set(&TypeDescriptor::String)),
    FieldDescriptor::optional("origin", 20, POINT_TY),
]);

static SHAPE_TY: TypeDescriptor = TypeDescriptor::Struct(&SHAPE);

static DRAWING: StructDescriptor = StructDescriptor::new("Drawing", &[
    FieldDescriptor::required("id", 1, TypeDescriptor::I64),
    FieldDescriptor::optional("layers", 2, TypeDescriptor::List(&TypeDescriptor::Map(&TypeDescriptor::I32, &SHAPE_TY))),
    FieldDescriptor::optional("scale", 3, TypeDescriptor::Double),
]);

/// Version 2 of a record: two fields.
static RECORD_V2: StructDescriptor = StructDescriptor::new("Record", &[
    FieldDescriptor::required("count", 1, TypeDescriptor::I32),
    FieldDescriptor::optional("label", 2, TypeDescriptor::String),
]);

/// Version 1 of the same record: only field 1.
static RECORD_V1: StructDescriptor = StructDescriptor::new("Record", &[
    FieldDescriptor::required("count", 1, TypeDescriptor::I32),
]);

static CHOICE: StructDescriptor = StructDescriptor::union("Choice", &[
    FieldDescriptor::new("number", 1, TypeDescriptor::I64),
    FieldDescriptor::new("text", 2, TypeDescriptor::String),
]);

static TRIPLE: StructDescriptor = StructDescriptor::new("Triple", &[
    FieldDescriptor::new("a", 1, TypeDescriptor::I32),
    FieldDescriptor::new("b", 2, TypeDescriptor::I32),
    FieldDescriptor::new("c", 3, TypeDescriptor::I32),
]);

// ============================================================================
//  HELPERS
// ============================================================================

fn protocols() -> Vec<(&'static str, Box<dyn Protocol>)> {
    vec![
        ("binary", ProtocolKind::Binary.protocol(ProtocolLimits::default())),
        ("compact", ProtocolKind::Compact.protocol(ProtocolLimits::default())),
    ]
}

/// Encodes then decodes `value` with every protocol, asserting equality and a drained buffer.
fn assert_roundtrip(value: Value, ty: &TypeDescriptor) {
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        codec::write_value(proto.as_mut(), &mut buf, &value, ty)
            .unwrap_or_else(|e| panic!("[{name}] encode failed: {e}"));
        let decoded = codec::read_value(proto.as_mut(), &mut buf, ty)
            .unwrap_or_else(|e| panic!("[{name}] decode failed: {e}"));
        assert_eq!(decoded, value, "[{name}] roundtrip mismatch");
        assert!(buf.is_empty(), "[{name}] {} bytes left over", buf.remaining());
    }
}

fn point(x: i32, y: i32) -> StructValue {
    StructValue::new().with(1, x).with(2, y)
}

fn sample_shape() -> StructValue {
    StructValue::new()
        .with(1, "triangle")
        .with(2, Value::List(vec![point(0, 0).into(), point(4, 0).into(), point(2, 3).into()]))
        .with(3, Value::Map(vec![
            (Value::from("apex"), point(2, 3).into()),
            (Value::from("base"), point(0, 0).into()),
        ]))
        .with(4, true)
        .with(5, Value::Set(vec!["red".into(), "thin".into()]))
        .with(20, point(-1, -1))
}

fn sample_drawing() -> StructValue {
    StructValue::new()
        .with(1, i64::MIN)
        .with(2, Value::List(vec![
            Value::Map(vec![(Value::I32(1), sample_shape().into())]),
            Value::Map(vec![]),
        ]))
        .with(3, 0.5f64)
}

// ============================================================================
//  ROUNDTRIPS
// ============================================================================

#[test]
fn test_scalars_roundtrip() {
    assert_roundtrip(Value::Void, &TypeDescriptor::Void);
    assert_roundtrip(Value::Bool(true), &TypeDescriptor::Bool);
    assert_roundtrip(Value::Bool(false), &TypeDescriptor::Bool);
    for v in [i8::MIN, -1, 0, 1, i8::MAX] {
        assert_roundtrip(Value::I8(v), &TypeDescriptor::I8);
    }
    for v in [i16::MIN, -1, 0, 1, i16::MAX] {
        assert_roundtrip(Value::I16(v), &TypeDescriptor::I16);
    }
    for v in [i32::MIN, -1, 0, 1, i32::MAX] {
        assert_roundtrip(Value::I32(v), &TypeDescriptor::I32);
    }
    for v in [i64::MIN, -1, 0, 1, i64::MAX] {
        assert_roundtrip(Value::I64(v), &TypeDescriptor::I64);
    }
    for v in [0.0, -0.0, std::f64::consts::PI, f64::MAX, f64::MIN_POSITIVE, f64::INFINITY, f64::NEG_INFINITY] {
        assert_roundtrip(Value::Double(v), &TypeDescriptor::Double);
    }
}

#[test]
fn test_blobs_roundtrip() {
    assert_roundtrip(Value::String(String::new()), &TypeDescriptor::String);
    assert_roundtrip(Value::String("hello ❤️".into()), &TypeDescriptor::String);
    assert_roundtrip(Value::String("x".repeat(70_000)), &TypeDescriptor::String);
    assert_roundtrip(Value::Binary(vec![]), &TypeDescriptor::Binary);
    assert_roundtrip(Value::Binary(vec![0xff, 0x00, 0xfe]), &TypeDescriptor::Binary);
}

#[test]
fn test_containers_roundtrip() {
    assert_roundtrip(Value::List(vec![]), &TypeDescriptor::List(&TypeDescriptor::I32));
    assert_roundtrip(Value::Set(vec![]), &TypeDescriptor::Set(&TypeDescriptor::String));
    assert_roundtrip(Value::Map(vec![]), &TypeDescriptor::Map(&TypeDescriptor::I32, &TypeDescriptor::String));

    let bools = Value::List(vec![true.into(), false.into(), true.into()]);
    assert_roundtrip(bools, &TypeDescriptor::List(&TypeDescriptor::Bool));

    let long: Vec<Value> = (0..100).map(Value::I64).collect();
    assert_roundtrip(Value::List(long), &TypeDescriptor::List(&TypeDescriptor::I64));

    let nested = Value::List(vec![
        Value::List(vec![Value::I8(1), Value::I8(2)]),
        Value::List(vec![]),
    ]);
    assert_roundtrip(nested, &TypeDescriptor::List(&TypeDescriptor::List(&TypeDescriptor::I8)));

    let map = Value::Map(vec![
        (Value::I16(1), Value::Double(1.5)),
        (Value::I16(-2), Value::Double(-2.5)),
    ]);
    assert_roundtrip(map, &TypeDescriptor::Map(&TypeDescriptor::I16, &TypeDescriptor::Double));
}

#[test]
fn test_structs_roundtrip() {
    assert_roundtrip(point(3, -4).into(), &POINT_TY);
    assert_roundtrip(sample_shape().into(), &SHAPE_TY);
    assert_roundtrip(sample_drawing().into(), &TypeDescriptor::Struct(&DRAWING));
    assert_roundtrip(StructValue::new().with(1, "bare").into(), &SHAPE_TY);
}

#[test]
fn test_i64_random_roundtrip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        let values: Vec<i64> = (0..2000).map(|_| rng.gen::<i64>() >> rng.gen_range(0..64)).collect();
        for v in &values {
            proto.write_i64(&mut buf, *v).unwrap();
        }
        for v in &values {
            assert_eq!(proto.read_i64(&mut buf).unwrap(), *v, "[{name}]");
        }
        assert!(buf.is_empty());
    }
}

#[test]
fn test_struct_reencoding_is_canonical() -> Result<()> {
    // Insertion order of the value does not matter; descriptor order does.
    let a = StructValue::new().with(2, 9).with(1, 8);
    let b = StructValue::new().with(1, 8).with(2, 9);

    let mut proto = BinaryProtocol::new();
    let mut buf_a = Buffer::new();
    let mut buf_b = Buffer::new();
    codec::write_struct(&mut proto, &mut buf_a, &a, &POINT)?;
    codec::write_struct(&mut proto, &mut buf_b, &b, &POINT)?;
    assert_eq!(buf_a.written(), buf_b.written());
    Ok(())
}

// ============================================================================
//  WIRE FORMAT
// ============================================================================

#[test]
fn test_binary_field_layout() -> Result<()> {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    codec::write_struct(&mut proto, &mut buf, &StructValue::new().with(1, 5), &TRIPLE)?;

    assert_eq!(buf.written(), &[0x08, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x00]);
    Ok(())
}

#[test]
fn test_binary_string_layout() -> Result<()> {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    proto.write_string(&mut buf, "hi")?;
    proto.write_double(&mut buf, 1.0)?;

    assert_eq!(buf.written(), &[0, 0, 0, 2, b'h', b'i', 0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_compact_field_deltas() -> Result<()> {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    let value = StructValue::new().with(1, 1).with(2, 2).with(3, 3);
    codec::write_struct(&mut proto, &mut buf, &value, &TRIPLE)?;

    // [delta 1 | i32] zigzag(n) for each field, then stop.
    assert_eq!(buf.written(), &[0x15, 0x02, 0x15, 0x04, 0x15, 0x06, 0x00]);

    let mut ids = Vec::new();
    proto.read_struct_begin(&mut buf)?;
    loop {
        let header = proto.read_field_begin(&mut buf)?;
        if header.is_stop() {
            break;
        }
        assert_eq!(header.ttype, TType::I32);
        ids.push(header.id);
        proto.read_i32(&mut buf)?;
        proto.read_field_end(&mut buf)?;
    }
    proto.read_struct_end(&mut buf)?;

    assert_eq!(ids, vec![1, 2, 3]);
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_compact_long_and_backward_deltas() -> Result<()> {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    proto.write_struct_begin(&mut buf, "Gap")?;
    proto.write_field_begin(&mut buf, "a", TType::I8, 1)?;
    proto.write_i8(&mut buf, 7)?;
    proto.write_field_begin(&mut buf, "b", TType::I8, 20)?;
    proto.write_i8(&mut buf, 8)?;
    proto.write_field_begin(&mut buf, "c", TType::I8, 2)?;
    proto.write_i8(&mut buf, 9)?;
    proto.write_field_stop(&mut buf)?;
    proto.write_struct_end(&mut buf)?;

    assert_eq!(buf.written(), &[0x13, 7, 0x03, 40, 8, 0x03, 4, 9, 0x00]);

    proto.read_struct_begin(&mut buf)?;
    let mut ids = Vec::new();
    loop {
        let header = proto.read_field_begin(&mut buf)?;
        if header.is_stop() {
            break;
        }
        ids.push(header.id);
        proto.read_i8(&mut buf)?;
    }
    proto.read_struct_end(&mut buf)?;
    assert_eq!(ids, vec![1, 20, 2]);
    Ok(())
}

#[test]
fn test_compact_nested_struct_restores_last_id() -> Result<()> {
    // Field 20 of Shape follows field 5; the nested Point resets the delta base.
    let value = StructValue::new().with(1, "s").with(5, Value::Set(vec![])).with(20, point(1, 2));
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    codec::write_struct(&mut proto, &mut buf, &value, &SHAPE)?;

    let decoded = codec::read_struct(&mut proto, &mut buf, &SHAPE)?;
    assert_eq!(decoded, value);
    Ok(())
}

#[test]
fn test_compact_bool_fields_pack_value() -> Result<()> {
    static FLAGS: StructDescriptor = StructDescriptor::new("Flags", &[
        FieldDescriptor::new("on", 1, TypeDescriptor::Bool),
        FieldDescriptor::new("off", 2, TypeDescriptor::Bool),
    ]);

    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    let value = StructValue::new().with(1, true).with(2, false);
    codec::write_struct(&mut proto, &mut buf, &value, &FLAGS)?;

    assert_eq!(buf.written(), &[0x11, 0x12, 0x00]);
    assert_eq!(codec::read_struct(&mut proto, &mut buf, &FLAGS)?, value);
    Ok(())
}

#[test]
fn test_compact_collection_headers() -> Result<()> {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    proto.write_list_begin(&mut buf, ListHeader::new(TType::I32, 3))?;
    proto.write_list_begin(&mut buf, ListHeader::new(TType::String, 20))?;
    proto.write_map_begin(&mut buf, MapHeader::new(TType::I32, TType::String, 0))?;
    proto.write_map_begin(&mut buf, MapHeader::new(TType::String, TType::I64, 2))?;

    assert_eq!(buf.written(), &[0x35, 0xf8, 20, 0x00, 0x02, 0x86]);

    assert_eq!(proto.read_list_begin(&mut buf)?, ListHeader::new(TType::I32, 3));
    assert_eq!(proto.read_list_begin(&mut buf)?, ListHeader::new(TType::String, 20));
    assert_eq!(proto.read_map_begin(&mut buf)?.len, 0);
    assert_eq!(proto.read_map_begin(&mut buf)?, MapHeader::new(TType::String, TType::I64, 2));
    Ok(())
}

// ============================================================================
//  MESSAGE HEADERS
// ============================================================================

#[test]
fn test_binary_strict_message_header() -> Result<()> {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    proto.write_message_begin(&mut buf, &MessageHeader::new("ping", MessageKind::Call, 1))?;
    proto.write_message_end(&mut buf)?;

    assert_eq!(buf.written(), &[0x80, 0x01, 0x00, 0x01, 0, 0, 0, 4, b'p', b'i', b'n', b'g', 0, 0, 0, 1]);

    let header = proto.read_message_begin(&mut buf)?;
    assert_eq!(header, MessageHeader::new("ping", MessageKind::Call, 1));
    Ok(())
}

#[test]
fn test_binary_legacy_message_header() -> Result<()> {
    let legacy = ProtocolLimits { strict_write: false, ..ProtocolLimits::default() };
    let mut writer = BinaryProtocol::with_limits(legacy);
    let mut buf = Buffer::new();
    writer.write_message_begin(&mut buf, &MessageHeader::new("get", MessageKind::Reply, -7))?;
    assert_eq!(buf.written(), &[0, 0, 0, 3, b'g', b'e', b't', 2, 0xff, 0xff, 0xff, 0xf9]);

    let mut lenient = BinaryProtocol::new();
    assert_eq!(lenient.read_message_begin(&mut buf.clone())?.seq, -7);

    let strict = ProtocolLimits { strict_read: true, ..ProtocolLimits::default() };
    let mut strict = BinaryProtocol::with_limits(strict);
    assert_eq!(strict.read_message_begin(&mut buf), Err(Error::BadVersion(3)));
    assert_eq!(buf.read_offset(), 0);
    Ok(())
}

#[test]
fn test_binary_rejects_bad_version() {
    let mut buf = Buffer::from_vec(vec![0x80, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
    let mut proto = BinaryProtocol::new();
    assert_eq!(proto.read_message_begin(&mut buf), Err(Error::BadVersion(0x8002_0001)));
}

#[test]
fn test_compact_message_header() -> Result<()> {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    proto.write_message_begin(&mut buf, &MessageHeader::new("ping", MessageKind::Call, 1))?;
    assert_eq!(buf.written(), &[0x82, 0x21, 0x01, 0x04, b'p', b'i', b'n', b'g']);

    buf.reset();
    let header = MessageHeader::new("stream", MessageKind::Oneway, i32::MIN);
    proto.write_message_begin(&mut buf, &header)?;
    assert_eq!(proto.read_message_begin(&mut buf)?, header);

    let mut bad = Buffer::from_vec(vec![0x81, 0x21, 0x01, 0x00]);
    assert_eq!(proto.read_message_begin(&mut bad), Err(Error::BadVersion(0x81)));
    Ok(())
}

#[test]
fn test_invalid_message_kind() {
    let mut buf = Buffer::from_vec(vec![0x82, 0xa1, 0x01, 0x00]);
    let mut proto = CompactProtocol::new();
    assert_eq!(proto.read_message_begin(&mut buf), Err(Error::InvalidMessageKind(5)));
}

// ============================================================================
//  FORWARD COMPATIBILITY & SKIP
// ============================================================================

#[test]
fn test_unknown_field_is_skipped() {
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        let v2 = StructValue::new().with(1, 42).with(2, "extra payload");
        codec::write_struct(proto.as_mut(), &mut buf, &v2, &RECORD_V2).unwrap();

        let v1 = codec::read_struct(proto.as_mut(), &mut buf, &RECORD_V1).unwrap();
        assert_eq!(v1, StructValue::new().with(1, 42), "[{name}]");
        assert!(buf.is_empty(), "[{name}] skip left {} bytes", buf.remaining());
    }
}

#[test]
fn test_unknown_nested_fields_are_skipped() {
    static SHAPE_NAME_ONLY: StructDescriptor = StructDescriptor::new("Shape", &[
        FieldDescriptor::required("name", 1, TypeDescriptor::String),
    ]);

    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        codec::write_struct(proto.as_mut(), &mut buf, &sample_shape(), &SHAPE).unwrap();
        // Trailing sentinel proves the skip stopped exactly at the end of the struct.
        proto.write_i32(&mut buf, 0x1234_5678).unwrap();

        let decoded = codec::read_struct(proto.as_mut(), &mut buf, &SHAPE_NAME_ONLY).unwrap();
        assert_eq!(decoded.get_str(1), Some("triangle"), "[{name}]");
        assert_eq!(decoded.len(), 1);
        assert_eq!(proto.read_i32(&mut buf).unwrap(), 0x1234_5678, "[{name}]");
        assert!(buf.is_empty());
    }
}

#[test]
fn test_field_with_unexpected_type_is_skipped() -> Result<()> {
    static RECORD_STRING_COUNT: StructDescriptor = StructDescriptor::new("Record", &[
        FieldDescriptor::optional("count", 1, TypeDescriptor::String),
        FieldDescriptor::optional("label", 2, TypeDescriptor::String),
    ]);

    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    let v2 = StructValue::new().with(1, 42).with(2, "kept");
    codec::write_struct(&mut proto, &mut buf, &v2, &RECORD_V2)?;

    let decoded = codec::read_struct(&mut proto, &mut buf, &RECORD_STRING_COUNT)?;
    assert_eq!(decoded, StructValue::new().with(2, "kept"));
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_skip_consumes_exactly_what_decode_consumes() {
    let drawing_ty = TypeDescriptor::Struct(&DRAWING);
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        codec::write_value(proto.as_mut(), &mut buf, &sample_drawing().into(), &drawing_ty).unwrap();
        proto.write_i8(&mut buf, 99).unwrap();

        let mut for_skip = buf.clone();
        codec::read_value(proto.as_mut(), &mut buf, &drawing_ty).unwrap();
        skip(proto.as_mut(), &mut for_skip, TType::Struct).unwrap();

        assert_eq!(buf.read_offset(), for_skip.read_offset(), "[{name}]");
        assert_eq!(proto.read_i8(&mut for_skip).unwrap(), 99);
    }
}

#[test]
fn test_skip_each_type() {
    let samples: Vec<(Value, TypeDescriptor)> = vec![
        (Value::Bool(true), TypeDescriptor::Bool),
        (Value::I8(-3), TypeDescriptor::I8),
        (Value::I16(300), TypeDescriptor::I16),
        (Value::I32(-70_000), TypeDescriptor::I32),
        (Value::I64(1 << 40), TypeDescriptor::I64),
        (Value::Double(2.5), TypeDescriptor::Double),
        (Value::String("skip me".into()), TypeDescriptor::String),
        (Value::Set(vec![Value::I32(1)]), TypeDescriptor::Set(&TypeDescriptor::I32)),
        (Value::Map(vec![(Value::Bool(false), Value::I8(1))]), TypeDescriptor::Map(&TypeDescriptor::Bool, &TypeDescriptor::I8)),
    ];
    for (name, mut proto) in protocols() {
        for (value, ty) in &samples {
            let mut buf = Buffer::new();
            codec::write_value(proto.as_mut(), &mut buf, value, ty).unwrap();
            skip(proto.as_mut(), &mut buf, ty.ttype()).unwrap();
            assert!(buf.is_empty(), "[{name}] {:?} left {} bytes", ty, buf.remaining());
        }
    }
}

#[test]
fn test_skip_depth_limit() {
    // 70 nested lists, each declaring one list element.
    let mut bytes = Vec::new();
    for _ in 0..70 {
        bytes.extend_from_slice(&[TType::List as u8, 0, 0, 0, 1]);
    }
    let mut buf = Buffer::from_vec(bytes);
    let mut proto = BinaryProtocol::new();
    assert_eq!(skip(&mut proto, &mut buf, TType::List), Err(Error::DepthLimit));
}

#[test]
fn test_skip_invalid_type_byte() {
    // Field header with type byte 0x07, which no TType uses.
    let mut buf = Buffer::from_vec(vec![0x07, 0x00, 0x01, 0x00]);
    let mut proto = BinaryProtocol::new();
    assert_eq!(codec::read_struct(&mut proto, &mut buf, &RECORD_V1), Err(Error::InvalidType(7)));
    assert_eq!(buf.read_offset(), 0);
}

#[test]
fn test_compact_skips_unknown_bool_field() -> Result<()> {
    static WITH_BOOL: StructDescriptor = StructDescriptor::new("Record", &[
        FieldDescriptor::new("count", 1, TypeDescriptor::I32),
        FieldDescriptor::new("flag", 2, TypeDescriptor::Bool),
        FieldDescriptor::new("label", 3, TypeDescriptor::String),
    ]);
    static WITHOUT_BOOL: StructDescriptor = StructDescriptor::new("Record", &[
        FieldDescriptor::new("count", 1, TypeDescriptor::I32),
        FieldDescriptor::new("label", 3, TypeDescriptor::String),
    ]);

    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    let full = StructValue::new().with(1, 5).with(2, true).with(3, "after");
    codec::write_struct(&mut proto, &mut buf, &full, &WITH_BOOL)?;

    let partial = codec::read_struct(&mut proto, &mut buf, &WITHOUT_BOOL)?;
    assert_eq!(partial, StructValue::new().with(1, 5).with(3, "after"));
    assert!(buf.is_empty());
    Ok(())
}

// ============================================================================
//  FAILURES
// ============================================================================

#[test]
fn test_underflow_leaves_offset_unchanged() {
    // Both formats read this as a length prefix promising more bytes than exist.
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::from_vec(vec![0x05, 0x00]);
        let err = proto.read_string(&mut buf).unwrap_err();
        assert!(err.is_underflow(), "[{name}] expected underflow, got {err}");
        assert_eq!(buf.read_offset(), 0, "[{name}]");
    }

    let mut buf = Buffer::from_vec(vec![0x00, 0x00]);
    let mut proto = BinaryProtocol::new();
    assert_eq!(proto.read_i32(&mut buf), Err(Error::Underflow { needed: 4, available: 2 }));
    assert_eq!(buf.read_offset(), 0);
}

#[test]
fn test_truncated_struct_rewinds() {
    for (name, mut proto) in protocols() {
        let mut full = Buffer::new();
        codec::write_struct(proto.as_mut(), &mut full, &sample_shape(), &SHAPE).unwrap();
        let bytes = full.written();

        for cut in [1, bytes.len() / 2, bytes.len() - 1] {
            let mut buf = Buffer::from_vec(bytes[..cut].to_vec());
            let err = codec::read_struct(proto.as_mut(), &mut buf, &SHAPE).unwrap_err();
            assert!(err.is_underflow(), "[{name}] cut {cut}: {err}");
            assert_eq!(buf.read_offset(), 0, "[{name}] cut {cut}");
        }

        // After the failures the same protocol instance still decodes cleanly.
        let decoded = codec::read_struct(proto.as_mut(), &mut full, &SHAPE).unwrap();
        assert_eq!(decoded, sample_shape());
    }
}

#[test]
fn test_declared_count_past_end_is_malformed() {
    // list<i32> declaring 3 elements, carrying 1.
    let mut buf = Buffer::from_vec(vec![0x08, 0, 0, 0, 3, 0, 0, 0, 1]);
    let mut proto = BinaryProtocol::new();
    let err = codec::read_value(&mut proto, &mut buf, &TypeDescriptor::List(&TypeDescriptor::I32)).unwrap_err();

    assert!(matches!(err, Error::MalformedContainer(_)), "got {err}");
    assert!(err.is_underflow());
    assert_eq!(buf.read_offset(), 0);
}

#[test]
fn test_huge_declared_count_does_not_preallocate() {
    // map<i32, i32> declaring i32::MAX entries followed by nothing.
    let mut buf = Buffer::from_vec(vec![0x08, 0x08, 0x7f, 0xff, 0xff, 0xff]);
    let mut proto = BinaryProtocol::new();
    let ty = TypeDescriptor::Map(&TypeDescriptor::I32, &TypeDescriptor::I32);
    assert!(matches!(codec::read_value(&mut proto, &mut buf, &ty), Err(Error::MalformedContainer(_))));
}

#[test]
fn test_negative_and_limited_sizes() {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::from_vec(vec![0xff, 0xff, 0xff, 0xfe]);
    assert_eq!(proto.read_binary(&mut buf), Err(Error::NegativeSize(-2)));

    let limits = ProtocolLimits { string_limit: Some(4), container_limit: Some(2), ..ProtocolLimits::default() };
    for mut proto in [ProtocolKind::Binary.protocol(limits), ProtocolKind::Compact.protocol(limits)] {
        let mut buf = Buffer::new();
        proto.write_string(&mut buf, "hello").unwrap();
        assert_eq!(proto.read_string(&mut buf), Err(Error::SizeLimit { size: 5, limit: 4 }));

        let mut buf = Buffer::new();
        proto.write_list_begin(&mut buf, ListHeader::new(TType::I8, 3)).unwrap();
        assert_eq!(proto.read_list_begin(&mut buf), Err(Error::SizeLimit { size: 3, limit: 2 }));
    }
}

#[test]
fn test_overflow_is_rejected_and_rolled_back() {
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        let err = codec::write_value(proto.as_mut(), &mut buf, &Value::I64(70_000), &TypeDescriptor::I16).unwrap_err();
        assert_eq!(err, Error::Overflow { ty: TType::I16, value: 70_000 }, "[{name}]");

        // A failing field mid-struct leaves nothing behind.
        let bad = StructValue::new().with(1, 1).with(2, Value::I64(i64::MAX));
        let err = codec::write_struct(proto.as_mut(), &mut buf, &bad, &POINT).unwrap_err();
        assert!(matches!(err, Error::Overflow { ty: TType::I32, .. }), "[{name}]");
        assert_eq!(buf.write_offset(), 0, "[{name}]");
    }
}

#[test]
fn test_narrow_values_widen() -> Result<()> {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    codec::write_value(&mut proto, &mut buf, &Value::I8(-5), &TypeDescriptor::I64)?;
    assert_eq!(codec::read_value(&mut proto, &mut buf, &TypeDescriptor::I64)?, Value::I64(-5));
    Ok(())
}

#[test]
fn test_type_mismatch_on_encode() {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    let err = codec::write_value(&mut proto, &mut buf, &Value::from("seven"), &TypeDescriptor::I32).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { expected: TType::I32, found: TType::String });
}

#[test]
fn test_element_type_mismatch_on_decode() -> Result<()> {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    codec::write_value(&mut proto, &mut buf, &Value::List(vec![Value::I8(1)]), &TypeDescriptor::List(&TypeDescriptor::I8))?;

    let err = codec::read_value(&mut proto, &mut buf, &TypeDescriptor::List(&TypeDescriptor::I64)).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { expected: TType::I64, found: TType::I8 });
    Ok(())
}

#[test]
fn test_invalid_utf8_string() {
    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    proto.write_binary(&mut buf, &[0xc3, 0x28]).unwrap();
    assert_eq!(proto.read_string(&mut buf), Err(Error::InvalidUtf8));
}

#[test]
fn test_required_fields() {
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        let err = codec::write_struct(proto.as_mut(), &mut buf, &StructValue::new().with(1, 1), &POINT).unwrap_err();
        assert_eq!(err, Error::MissingField { structure: "Point", field: "y" }, "[{name}]");

        // A peer that never sent `y`.
        codec::write_struct(proto.as_mut(), &mut buf, &StructValue::new().with(1, 1), &TRIPLE).unwrap();
        let err = codec::read_struct(proto.as_mut(), &mut buf, &POINT).unwrap_err();
        assert_eq!(err, Error::MissingField { structure: "Point", field: "y" }, "[{name}]");
    }
}

#[test]
fn test_union_exactly_one_field() {
    for (name, mut proto) in protocols() {
        let mut buf = Buffer::new();
        let one = StructValue::new().with(2, "only");
        codec::write_struct(proto.as_mut(), &mut buf, &one, &CHOICE).unwrap();
        assert_eq!(codec::read_struct(proto.as_mut(), &mut buf, &CHOICE).unwrap(), one, "[{name}]");

        let none = StructValue::new();
        assert_eq!(
            codec::write_struct(proto.as_mut(), &mut buf, &none, &CHOICE),
            Err(Error::InvalidUnion { structure: "Choice", count: 0 })
        );

        let two = StructValue::new().with(1, 1i64).with(2, "two");
        assert_eq!(
            codec::write_struct(proto.as_mut(), &mut buf, &two, &CHOICE),
            Err(Error::InvalidUnion { structure: "Choice", count: 2 })
        );
    }
}

#[test]
fn test_descriptor_validation() {
    static DUPLICATE: StructDescriptor = StructDescriptor::new("Dup", &[
        FieldDescriptor::new("a", 1, TypeDescriptor::I32),
        FieldDescriptor::new("b", 1, TypeDescriptor::String),
    ]);
    static ZERO: StructDescriptor = StructDescriptor::new("Zero", &[
        FieldDescriptor::new("a", 0, TypeDescriptor::I32),
    ]);

    assert!(SHAPE.validate().is_ok());
    assert_eq!(DUPLICATE.validate(), Err(Error::DuplicateFieldId { structure: "Dup", id: 1 }));
    assert_eq!(ZERO.validate(), Err(Error::InvalidFieldId(0)));

    let mut proto = BinaryProtocol::new();
    let mut buf = Buffer::new();
    assert_eq!(
        codec::write_struct(&mut proto, &mut buf, &StructValue::new().with(0, 1), &ZERO),
        Err(Error::InvalidFieldId(0))
    );
}

#[test]
fn test_struct_end_without_begin() {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    assert_eq!(proto.write_struct_end(&mut buf), Err(Error::ScopeUnderflow));
    assert_eq!(proto.read_struct_end(&mut buf), Err(Error::ScopeUnderflow));
}

#[test]
fn test_compact_has_no_void_nibble() {
    let mut proto = CompactProtocol::new();
    let mut buf = Buffer::new();
    assert_eq!(
        proto.write_list_begin(&mut buf, ListHeader::new(TType::Void, 0)),
        Err(Error::InvalidType(TType::Void as u8))
    );
}

#[test]
fn test_ttype_bytes() {
    for b in 0..=255u8 {
        if let Some(t) = TType::from_u8(b) {
            assert_eq!(t as u8, b);
        }
    }
    assert_eq!(TType::from_u8(5), None);
    assert_eq!(TType::from_u8(16), None);
    assert_eq!(ProtocolKind::parse("Compact"), Some(ProtocolKind::Compact));
    assert_eq!(ProtocolKind::parse("json"), None);
}
