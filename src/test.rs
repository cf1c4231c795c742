use rstest::rstest;

use crate::expr::Expr;
use crate::*;

fn single_field_product(format: Format, field_type: Type, bytes: &[u8]) -> Product {
    let mut definition = Definition::new();
    let type_id = definition.add(field_type).unwrap();
    let mut root = Type::record(format);
    root.add_field(Field::new("value", type_id)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    Product::open_memory(definition, bytes.to_vec()).unwrap()
}

fn value_cursor(product: &Product) -> Cursor<'_> {
    let mut cursor = Cursor::new(product).unwrap();
    cursor.goto_record_field_by_name("value").unwrap();
    cursor
}

const NUMERIC: [ReadType; 10] = [
    ReadType::Int8,
    ReadType::UInt8,
    ReadType::Int16,
    ReadType::UInt16,
    ReadType::Int32,
    ReadType::UInt32,
    ReadType::Int64,
    ReadType::UInt64,
    ReadType::Float,
    ReadType::Double,
];

fn read_as(cursor: &Cursor, requested: ReadType) -> Result<f64> {
    Ok(match requested {
        ReadType::Int8 => f64::from(cursor.read_int8()?),
        ReadType::UInt8 => f64::from(cursor.read_uint8()?),
        ReadType::Int16 => f64::from(cursor.read_int16()?),
        ReadType::UInt16 => f64::from(cursor.read_uint16()?),
        ReadType::Int32 => f64::from(cursor.read_int32()?),
        ReadType::UInt32 => f64::from(cursor.read_uint32()?),
        ReadType::Int64 => cursor.read_int64()? as f64,
        ReadType::UInt64 => cursor.read_uint64()? as f64,
        ReadType::Float => f64::from(cursor.read_float()?),
        ReadType::Double => cursor.read_double()?,
        _ => unreachable!(),
    })
}

/// reading succeeds iff range(stored) is contained in range(requested)
fn widening_allowed(stored: ReadType, requested: ReadType) -> bool {
    use ReadType::*;
    match requested {
        Int8 => stored == Int8,
        UInt8 => stored == UInt8,
        Int16 => matches!(stored, Int8 | UInt8 | Int16),
        UInt16 => matches!(stored, UInt8 | UInt16),
        Int32 => matches!(stored, Int8 | UInt8 | Int16 | UInt16 | Int32),
        UInt32 => matches!(stored, UInt8 | UInt16 | UInt32),
        Int64 => matches!(stored, Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32 | Int64),
        UInt64 => matches!(stored, UInt8 | UInt16 | UInt32 | UInt64),
        Float | Double => true,
        _ => false,
    }
}

fn stored_case(stored: ReadType) -> (Type, Vec<u8>, f64) {
    let number = |read_type, bits| Type::integer(Format::Binary, read_type).with_bit_size(bits);
    match stored {
        ReadType::Int8 => (number(ReadType::Int8, 8), vec![0xEB], -21.0),
        ReadType::UInt8 => (number(ReadType::UInt8, 8), vec![0xFF], 255.0),
        ReadType::Int16 => (
            number(ReadType::Int16, 16),
            (-515i16).to_be_bytes().to_vec(),
            -515.0,
        ),
        ReadType::UInt16 => (
            number(ReadType::UInt16, 16),
            65535u16.to_be_bytes().to_vec(),
            65535.0,
        ),
        ReadType::Int32 => (
            number(ReadType::Int32, 32),
            (-70000i32).to_be_bytes().to_vec(),
            -70000.0,
        ),
        ReadType::UInt32 => (
            number(ReadType::UInt32, 32),
            3_000_000_000u32.to_be_bytes().to_vec(),
            3_000_000_000.0,
        ),
        ReadType::Int64 => (
            number(ReadType::Int64, 64),
            (-4_000_000_000i64).to_be_bytes().to_vec(),
            -4_000_000_000.0,
        ),
        ReadType::UInt64 => (
            number(ReadType::UInt64, 64),
            77u64.to_be_bytes().to_vec(),
            77.0,
        ),
        ReadType::Float => (
            Type::real(Format::Binary, ReadType::Float).with_bit_size(32),
            1.5f32.to_be_bytes().to_vec(),
            1.5,
        ),
        ReadType::Double => (
            Type::real(Format::Binary, ReadType::Double).with_bit_size(64),
            (-2.25f64).to_be_bytes().to_vec(),
            -2.25,
        ),
        _ => unreachable!(),
    }
}

#[rstest]
#[case(ReadType::Int8)]
#[case(ReadType::UInt8)]
#[case(ReadType::Int16)]
#[case(ReadType::UInt16)]
#[case(ReadType::Int32)]
#[case(ReadType::UInt32)]
#[case(ReadType::Int64)]
#[case(ReadType::UInt64)]
#[case(ReadType::Float)]
#[case(ReadType::Double)]
fn widening_lattice(#[case] stored: ReadType) {
    let (field_type, bytes, expected) = stored_case(stored);
    let product = single_field_product(Format::Binary, field_type, &bytes);
    let cursor = value_cursor(&product);
    for requested in NUMERIC {
        match read_as(&cursor, requested) {
            Ok(value) => {
                assert!(
                    widening_allowed(stored, requested),
                    "{stored} -> {requested} should have been rejected"
                );
                assert_eq!(value, expected, "{stored} -> {requested}");
            }
            Err(Error::InvalidType(_)) => {
                assert!(
                    !widening_allowed(stored, requested),
                    "{stored} -> {requested} should have been accepted"
                );
            }
            Err(other) => panic!("unexpected error for {stored} -> {requested}: {other}"),
        }
    }
}

#[test]
fn uint64_widens_through_the_signed_intermediate() {
    let product = single_field_product(
        Format::Binary,
        Type::integer(Format::Binary, ReadType::UInt64).with_bit_size(64),
        &u64::MAX.to_be_bytes(),
    );
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_uint64().unwrap(), u64::MAX);
    // matches a (double)(int64_t) cast chain
    assert_eq!(cursor.read_double().unwrap(), -1.0);
}

// S1: ascii uint16 field containing "65535"
#[test]
fn ascii_integer_widening() {
    let product = single_field_product(
        Format::Ascii,
        Type::integer(Format::Ascii, ReadType::UInt16).with_byte_size(5),
        b"65535",
    );
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_int32().unwrap(), 65535);
    assert_eq!(cursor.read_uint16().unwrap(), 65535);
    assert!(matches!(cursor.read_int16(), Err(Error::InvalidType(_))));
}

// S2: int16 with conversion (0.01, 1, 0, -32768)
#[test]
fn conversion_with_invalid_sentinel() {
    let field = || {
        Type::integer(Format::Binary, ReadType::Int16)
            .with_bit_size(16)
            .with_conversion(Conversion::new(0.01, 1.0, 0.0, -32768.0))
    };

    let product = single_field_product(Format::Binary, field(), &12345i16.to_be_bytes());
    let cursor = value_cursor(&product);
    assert!((cursor.read_double().unwrap() - 123.45).abs() < 1e-12);
    // the conversion forces the effective read type to double
    assert!(matches!(cursor.read_int16(), Err(Error::InvalidType(_))));

    set_option_perform_conversions(false);
    assert_eq!(cursor.read_double().unwrap(), 12345.0);
    assert_eq!(cursor.read_int16().unwrap(), 12345);
    set_option_perform_conversions(true);

    let product = single_field_product(Format::Binary, field(), &(-32768i16).to_be_bytes());
    let cursor = value_cursor(&product);
    assert!(cursor.read_double().unwrap().is_nan());
}

fn int32_matrix_product() -> Product {
    let mut definition = Definition::new();
    let base = definition
        .add(Type::integer(Format::Binary, ReadType::Int32).with_bit_size(32))
        .unwrap();
    let array = definition
        .add(
            Type::array(Format::Binary, base)
                .add_fixed_dimension(2)
                .unwrap()
                .add_fixed_dimension(3)
                .unwrap(),
        )
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("value", array)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    let mut bytes = Vec::new();
    for value in [1i32, 2, 3, 4, 5, 6] {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    Product::open_memory(definition, bytes).unwrap()
}

// S3: 2x3 row-major [1..6]
#[test]
fn c_and_fortran_ordering() {
    let product = int32_matrix_product();
    let cursor = value_cursor(&product);
    let mut c_order = [0i32; 6];
    cursor
        .read_int32_array(&mut c_order, ArrayOrdering::C)
        .unwrap();
    assert_eq!(c_order, [1, 2, 3, 4, 5, 6]);
    let mut fortran = [0i32; 6];
    cursor
        .read_int32_array(&mut fortran, ArrayOrdering::Fortran)
        .unwrap();
    assert_eq!(fortran, [1, 4, 2, 5, 3, 6]);
}

#[test]
fn partial_reads_match_whole_reads() {
    let product = int32_matrix_product();
    let cursor = value_cursor(&product);
    let mut whole = [0i32; 6];
    cursor.read_int32_array(&mut whole, ArrayOrdering::C).unwrap();
    for offset in 0..6i64 {
        for length in 0..=(6 - offset) {
            let mut partial = vec![0i32; length as usize];
            cursor
                .read_int32_partial_array(offset, length, &mut partial)
                .unwrap();
            assert_eq!(partial, whole[offset as usize..(offset + length) as usize]);
        }
    }
    let mut out = [0i32; 2];
    assert!(matches!(
        cursor.read_int32_partial_array(5, 2, &mut out),
        Err(Error::ArrayOutOfBounds(_))
    ));
    assert!(matches!(
        cursor.read_int32_partial_array(-1, 1, &mut out[..1]),
        Err(Error::ArrayOutOfBounds(_))
    ));
}

#[test]
fn partial_reads_widen_like_whole_reads() {
    let mut definition = Definition::new();
    let base = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let array = definition
        .add(
            Type::array(Format::Binary, base)
                .add_fixed_dimension(4)
                .unwrap(),
        )
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("value", array)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    let product = Product::open_memory(definition, vec![250, 251, 252, 253]).unwrap();
    let cursor = value_cursor(&product);
    let mut out = [0i32; 2];
    cursor.read_int32_partial_array(1, 2, &mut out).unwrap();
    assert_eq!(out, [251, 252]);
}

#[test]
fn cursor_navigation_is_invertible() {
    let product = int32_matrix_product();
    let mut cursor = Cursor::new(&product).unwrap();
    let before = cursor.clone();
    cursor.goto_first_record_field().unwrap();
    cursor.goto_parent().unwrap();
    assert!(cursor == before);

    cursor.goto_record_field_by_name("value").unwrap();
    let at_array = cursor.clone();
    cursor.goto_array_element(&[1, 2]).unwrap();
    assert_eq!(cursor.index(), 5);
    cursor.goto_parent().unwrap();
    assert!(cursor == at_array);
    cursor.goto_root().unwrap();
    assert!(cursor == before);
}

#[test]
fn sub_byte_binary_fields() {
    // 4-bit unsigned, 3-bit unsigned, 9-bit signed packed MSB-first:
    // 1010 011 111111011 -> 0xA7 0xEC
    let mut definition = Definition::new();
    let a = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(4))
        .unwrap();
    let b = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(3))
        .unwrap();
    let c = definition
        .add(Type::integer(Format::Binary, ReadType::Int16).with_bit_size(9))
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("a", a)).unwrap();
    root.add_field(Field::new("b", b)).unwrap();
    root.add_field(Field::new("c", c)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    let product = Product::open_memory(definition, vec![0xA7, 0xEC]).unwrap();

    let mut cursor = Cursor::new(&product).unwrap();
    assert_eq!(cursor.bit_size().unwrap(), 16);
    cursor.goto_record_field_by_name("a").unwrap();
    assert_eq!(cursor.read_uint8().unwrap(), 0b1010);
    cursor.goto_next_record_field().unwrap();
    assert_eq!(cursor.read_uint8().unwrap(), 0b011);
    cursor.goto_next_record_field().unwrap();
    assert_eq!(cursor.read_int16().unwrap(), -5);
}

#[test]
fn little_endian_numbers() {
    let product = single_field_product(
        Format::Binary,
        Type::integer(Format::Binary, ReadType::UInt32)
            .with_bit_size(32)
            .with_endianness(Endianness::Little),
        &0xA1B2C3D4u32.to_le_bytes(),
    );
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_uint32().unwrap(), 0xA1B2C3D4);
}

// S5: vsf_integer {scale=2, value=1234}
#[test]
fn vsf_integer_scaling() {
    let mut definition = Definition::new();
    let scale = definition
        .add(Type::integer(Format::Binary, ReadType::Int32).with_bit_size(32))
        .unwrap();
    let value = definition
        .add(Type::real(Format::Binary, ReadType::Double).with_bit_size(64))
        .unwrap();
    let mut base = Type::record(Format::Binary);
    base.add_field(Field::new("scale_factor", scale)).unwrap();
    base.add_field(Field::new("value", value)).unwrap();
    let base_id = definition.add(base).unwrap();
    let vsf = definition
        .add(Type::vsf_integer(Format::Binary, base_id))
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("value", vsf)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&2i32.to_be_bytes());
    bytes.extend_from_slice(&1234f64.to_be_bytes());
    let product = Product::open_memory(definition, bytes).unwrap();
    let cursor = value_cursor(&product);
    assert!((cursor.read_double().unwrap() - 12.34).abs() < 1e-12);
}

#[test]
fn time_special_type() {
    let mut definition = Definition::new();
    let seconds = definition
        .add(Type::real(Format::Binary, ReadType::Double).with_bit_size(64))
        .unwrap();
    let time = definition
        .add(Type::time(
            Format::Binary,
            seconds,
            Expr::parse("float(.)").unwrap(),
        ))
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("value", time)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    let product = Product::open_memory(definition, 86400.5f64.to_be_bytes().to_vec()).unwrap();
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_double().unwrap(), 86400.5);

    set_option_bypass_special_types(true);
    let bypassed = value_cursor(&product);
    assert_eq!(bypassed.current_type().class(), TypeClass::Real);
    set_option_bypass_special_types(false);
}

#[test]
fn complex_reads() {
    let mut definition = Definition::new();
    let double = definition
        .add(Type::real(Format::Binary, ReadType::Double).with_bit_size(64))
        .unwrap();
    let mut pair = Type::record(Format::Binary);
    pair.add_field(Field::new("real", double)).unwrap();
    pair.add_field(Field::new("imaginary", double)).unwrap();
    let pair_id = definition.add(pair).unwrap();
    let complex = definition
        .add(Type::complex(Format::Binary, pair_id))
        .unwrap();
    let array = definition
        .add(
            Type::array(Format::Binary, complex)
                .add_fixed_dimension(2)
                .unwrap(),
        )
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("value", array)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);

    let mut bytes = Vec::new();
    for value in [1.0f64, 2.0, 3.0, 4.0] {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    let product = Product::open_memory(definition, bytes).unwrap();
    let cursor = value_cursor(&product);

    let mut element = cursor.clone();
    element.goto_first_array_element().unwrap();
    assert_eq!(element.read_complex_double_pair().unwrap(), [1.0, 2.0]);
    assert_eq!(element.read_complex_double_split().unwrap(), (1.0, 2.0));

    let mut pairs = [0f64; 4];
    cursor
        .read_complex_double_pairs_array(&mut pairs, ArrayOrdering::C)
        .unwrap();
    assert_eq!(pairs, [1.0, 2.0, 3.0, 4.0]);

    let mut re = [0f64; 2];
    let mut im = [0f64; 2];
    cursor
        .read_complex_double_split_array(&mut re, &mut im, ArrayOrdering::C)
        .unwrap();
    assert_eq!(re, [1.0, 3.0]);
    assert_eq!(im, [2.0, 4.0]);
}

fn ascii_array_product(values: &[i64]) -> Product {
    let mut definition = Definition::new();
    let number = definition
        .add(Type::integer(Format::Ascii, ReadType::Int32).with_byte_size(2))
        .unwrap();
    let array = definition
        .add(
            Type::array(Format::Ascii, number)
                .add_fixed_dimension(values.len() as i64)
                .unwrap(),
        )
        .unwrap();
    let mut root = Type::record(Format::Ascii);
    root.add_field(Field::new("arr", array)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    let mut bytes = Vec::new();
    for value in values {
        bytes.extend_from_slice(format!("{value:2}").as_bytes());
    }
    Product::open_memory(definition, bytes).unwrap()
}

// S4: count(./arr, int(.) > 3) over [1, 4, 2, 5, 3]
#[test]
fn expression_count_over_array() {
    let product = ascii_array_product(&[1, 4, 2, 5, 3]);
    let cursor = Cursor::new(&product).unwrap();
    let expr = Expr::parse("count(./arr, int(.) > 3)").unwrap();
    assert_eq!(expr.eval_integer(Some(&cursor)).unwrap(), 2);
    // a bare node in a comparison reads as a number
    let expr = Expr::parse("count(./arr, . > 3)").unwrap();
    assert_eq!(expr.eval_integer(Some(&cursor)).unwrap(), 2);
}

#[test]
fn expression_aggregation_and_navigation() {
    let product = ascii_array_product(&[10, 20, 30, 40]);
    let cursor = Cursor::new(&product).unwrap();
    let eval_int = |text: &str| {
        Expr::parse(text)
            .unwrap()
            .eval_integer(Some(&cursor))
            .unwrap()
    };
    assert_eq!(eval_int("add(/arr, int(.))"), 100);
    assert_eq!(eval_int("max(/arr, int(.))"), 40);
    assert_eq!(eval_int("min(/arr, int(.))"), 10);
    assert_eq!(eval_int("index(/arr, int(.) == 30)"), 2);
    assert_eq!(eval_int("index(/arr, int(.) == 99)"), -1);
    assert_eq!(eval_int("unboundindex(/arr, int(.) == 30)"), 2);
    assert_eq!(eval_int("int(/arr[1]) + int(/arr[3])"), 60);
    assert_eq!(eval_int("numelements(/arr)"), 4);
    assert_eq!(eval_int("numdims(/arr)"), 1);
    assert_eq!(eval_int("dim(/arr, 0)"), 4);
    assert_eq!(eval_int("at(/arr[2], int(.))"), 30);
    assert_eq!(eval_int("with(i = 2, int(/arr[i]))"), 30);
    assert_eq!(eval_int("bytesize(/arr)"), 8);
    assert_eq!(eval_int("bitsize(/arr[0])"), 16);
    assert_eq!(eval_int("byteoffset(/arr[1])"), 2);
    assert_eq!(eval_int("index(/arr[2])"), 2);
    assert_eq!(eval_int("filesize()"), 8);

    let all = Expr::parse("all(/arr, int(.) >= 10)").unwrap();
    assert!(all.eval_bool(Some(&cursor)).unwrap());
    let exists = Expr::parse("exists(/arr, int(.) == 20)").unwrap();
    assert!(exists.eval_bool(Some(&cursor)).unwrap());
    let exists_field = Expr::parse("exists(/arr)").unwrap();
    assert!(exists_field.eval_bool(Some(&cursor)).unwrap());
    let exists_missing = Expr::parse("exists(/nope)").unwrap();
    assert!(!exists_missing.eval_bool(Some(&cursor)).unwrap());
}

#[test]
fn expression_out_of_bounds_is_reported_even_without_checks() {
    let product = ascii_array_product(&[10, 20]);
    let cursor = Cursor::new(&product).unwrap();
    set_option_perform_boundary_checks(false);
    let expr = Expr::parse("int(/arr[7])").unwrap();
    let result = expr.eval_integer(Some(&cursor));
    set_option_perform_boundary_checks(true);
    assert!(matches!(result, Err(Error::ArrayOutOfBounds(_))));
}

#[test]
fn product_variables() {
    let mut product = ascii_array_product(&[1, 2]);
    product.add_variable("sizes", 4);
    let cursor = Cursor::new(&product).unwrap();
    let run = |text: &str| {
        Expr::parse(text)
            .unwrap()
            .eval_void(Some(&cursor))
            .unwrap()
    };
    run("$sizes[0] = 11; $sizes[1] = 22");
    run("for i = 2 to 3 do $sizes[i] = 10 * i");
    let eval_int = |text: &str| {
        Expr::parse(text)
            .unwrap()
            .eval_integer(Some(&cursor))
            .unwrap()
    };
    assert_eq!(eval_int("$sizes[0]"), 11);
    assert_eq!(eval_int("$sizes"), 11);
    assert_eq!(eval_int("$sizes[3]"), 30);
    assert_eq!(eval_int("index($sizes, $sizes == 22)"), 1);
    let exists = Expr::parse("exists($sizes, $sizes == 30)").unwrap();
    assert!(exists.eval_bool(Some(&cursor)).unwrap());

    let unknown = Expr::parse("$missing").unwrap();
    assert!(matches!(
        unknown.eval_integer(Some(&cursor)),
        Err(Error::Expression(_))
    ));
    let indexed_in_scope = Expr::parse("exists($sizes, $sizes[0] == 11)").unwrap();
    assert!(matches!(
        indexed_in_scope.eval_bool(Some(&cursor)),
        Err(Error::Expression(_))
    ));
}

#[test]
fn asciiline_view() {
    let mut definition = Definition::new();
    let text = definition
        .add(Type::text(Format::Ascii).with_byte_size(17))
        .unwrap();
    let root = {
        let mut root = Type::record(Format::Ascii);
        root.add_field(Field::new("value", text)).unwrap();
        definition.add(root).unwrap()
    };
    definition.set_root(root);
    let product = Product::open_memory(definition, b"first line\nsecond".to_vec()).unwrap();
    let cursor = Cursor::new(&product).unwrap();
    let expr = Expr::parse("numelements(asciiline)").unwrap();
    assert_eq!(expr.eval_integer(Some(&cursor)).unwrap(), 2);
    let expr = Expr::parse("str(asciiline[1])").unwrap();
    assert_eq!(expr.eval_string(Some(&cursor)).unwrap(), b"second".to_vec());
    let expr = Expr::parse("length(asciiline[0])").unwrap();
    assert_eq!(expr.eval_integer(Some(&cursor)).unwrap(), 10);
}

#[test]
fn dynamic_sizes_from_expressions() {
    let mut definition = Definition::new();
    let len = definition
        .add(Type::integer(Format::Ascii, ReadType::Int32).with_byte_size(2))
        .unwrap();
    let body = definition
        .add(
            Type::text(Format::Ascii)
                .with_byte_size_expr(Expr::parse("int(../len)").unwrap()),
        )
        .unwrap();
    let mut root = Type::record(Format::Ascii);
    root.add_field(Field::new("len", len)).unwrap();
    root.add_field(Field::new("body", body)).unwrap();
    root.add_field(Field::new("rest", len)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);

    let product = Product::open_memory(definition, b" 5hello42".to_vec()).unwrap();
    let mut cursor = Cursor::new(&product).unwrap();
    cursor.goto_record_field_by_name("body").unwrap();
    assert_eq!(cursor.read_string().unwrap(), "hello");
    assert_eq!(cursor.string_length().unwrap(), 5);
    cursor.goto_parent().unwrap();
    cursor.goto_record_field_by_name("rest").unwrap();
    assert_eq!(cursor.read_int32().unwrap(), 42);
}

#[test]
fn ascii_mappings_override_value_and_length() {
    let number = || {
        Type::integer(Format::Ascii, ReadType::Int32)
            .with_byte_size(2)
            .with_integer_mapping("N/A", -1)
    };
    let product = single_field_product(Format::Ascii, number(), b"N/Ax");
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_int32().unwrap(), -1);
    // the matched mapping also fixes the consumed length
    assert_eq!(cursor.bit_size().unwrap(), 24);

    let product = single_field_product(Format::Ascii, number(), b"42xx");
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_int32().unwrap(), 42);
    assert_eq!(cursor.bit_size().unwrap(), 16);
}

#[test]
fn explicit_field_offset_expressions() {
    let mut definition = Definition::new();
    let header = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let value = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("skip", header)).unwrap();
    // the payload sits at the byte offset named by the first field
    root.add_field(
        Field::new("value", value)
            .with_bit_offset_expr(Expr::parse("int(./skip) * 8").unwrap()),
    )
    .unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);

    let product = Product::open_memory(definition, vec![3, 0xAA, 0xBB, 0xCC]).unwrap();
    let cursor = value_cursor(&product);
    assert_eq!(cursor.file_bit_offset().unwrap(), 24);
    assert_eq!(cursor.read_uint8().unwrap(), 0xCC);
}

#[test]
fn union_records_expose_only_the_active_field() {
    let mut definition = Definition::new();
    let tag = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let word = definition
        .add(Type::integer(Format::Binary, ReadType::UInt16).with_bit_size(16))
        .unwrap();
    let half = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let mut union = Type::union(Format::Binary, Expr::parse("int(../tag)").unwrap());
    union.add_field(Field::new("word", word)).unwrap();
    union.add_field(Field::new("half", half)).unwrap();
    let union_id = definition.add(union).unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("tag", tag)).unwrap();
    root.add_field(Field::new("value", union_id)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);

    let product = Product::open_memory(definition, vec![0x00, 0x01, 0x02]).unwrap();
    let mut cursor = Cursor::new(&product).unwrap();
    cursor.goto_record_field_by_name("value").unwrap();
    assert_eq!(cursor.available_union_field_index().unwrap(), 0);
    assert!(cursor.record_field_available_status(0).unwrap());
    assert!(!cursor.record_field_available_status(1).unwrap());

    let mut active = cursor.clone();
    active.goto_available_union_field().unwrap();
    assert_eq!(active.read_uint16().unwrap(), 0x0102);

    let mut inactive = cursor.clone();
    assert!(matches!(
        inactive.goto_record_field_by_index(1),
        Err(Error::InvalidType(_))
    ));
}

#[test]
fn optional_fields_resolve_to_no_data() {
    let mut definition = Definition::new();
    let flag = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let value = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let mut root = Type::record(Format::Binary);
    root.add_field(Field::new("flag", flag)).unwrap();
    root.add_field(
        Field::new("maybe", value)
            .with_available_expr(Expr::parse("int(./flag) == 1").unwrap()),
    )
    .unwrap();
    root.add_field(Field::new("after", value)).unwrap();
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);

    // flag = 0: the optional field is absent and 'after' moves up
    let product = Product::open_memory(definition.clone(), vec![0, 9]).unwrap();
    let mut cursor = Cursor::new(&product).unwrap();
    assert!(!cursor.record_field_available_status(1).unwrap());
    cursor.goto_record_field_by_name("maybe").unwrap();
    assert_eq!(
        cursor.current_type().special_kind(),
        Some(SpecialKind::NoData)
    );
    assert!(cursor.read_uint8().is_err());
    cursor.goto_parent().unwrap();
    cursor.goto_record_field_by_name("after").unwrap();
    assert_eq!(cursor.read_uint8().unwrap(), 9);

    // flag = 1: the optional field is present
    let product = Product::open_memory(definition, vec![1, 7, 9]).unwrap();
    let mut cursor = Cursor::new(&product).unwrap();
    assert!(cursor.record_field_available_status(1).unwrap());
    cursor.goto_record_field_by_name("maybe").unwrap();
    assert_eq!(cursor.read_uint8().unwrap(), 7);
    cursor.goto_parent().unwrap();
    cursor.goto_record_field_by_name("after").unwrap();
    assert_eq!(cursor.read_uint8().unwrap(), 9);
}

#[test]
fn fast_size_expressions_follow_the_option() {
    let mut definition = Definition::new();
    let len = definition
        .add(Type::integer(Format::Ascii, ReadType::Int32).with_byte_size(2))
        .unwrap();
    let mut root = Type::record(Format::Ascii);
    root.add_field(Field::new("len", len)).unwrap();
    root.add_field(Field::new("other", len)).unwrap();
    // redundant size expression: claims a larger size than the field sum
    let root = root.with_byte_size_expr(Expr::parse("int(./len)").unwrap());
    let root_id = definition.add(root).unwrap();
    definition.set_root(root_id);
    let product = Product::open_memory(definition, b" 812345678".to_vec()).unwrap();
    let cursor = Cursor::new(&product).unwrap();

    assert_eq!(cursor.byte_size().unwrap(), 8);
    set_option_use_fast_size_expressions(false);
    assert_eq!(cursor.byte_size().unwrap(), 4);
    set_option_use_fast_size_expressions(true);
}

// S6: XML synthesis end to end
#[test]
fn xml_synthesis_product() {
    let product =
        Product::open_memory_self_describing(b"<a><b>1</b><b>2</b></a>".to_vec()).unwrap();
    let mut cursor = Cursor::new(&product).unwrap();
    assert_eq!(cursor.num_elements().unwrap(), 1);
    cursor.goto_record_field_by_name("a").unwrap();
    assert_eq!(cursor.current_type().class(), TypeClass::Record);
    cursor.goto_record_field_by_name("b").unwrap();
    assert_eq!(cursor.current_type().class(), TypeClass::Array);
    assert_eq!(cursor.num_elements().unwrap(), 2);
    cursor.goto_first_array_element().unwrap();
    assert_eq!(cursor.read_string().unwrap(), "1");
    cursor.goto_next_array_element().unwrap();
    assert_eq!(cursor.read_string().unwrap(), "2");
    assert_eq!(cursor.string_length().unwrap(), 1);

    // expressions run over the synthesized tree as well
    cursor.goto_root().unwrap();
    let expr = Expr::parse("int(/a/b[1]) - int(/a/b[0])").unwrap();
    assert_eq!(expr.eval_integer(Some(&cursor)).unwrap(), 1);
}

#[test]
fn xml_attributes_are_reachable() {
    let product = Product::open_memory_self_describing(
        b"<doc unit=\"m\"><v>1.5</v></doc>".to_vec(),
    )
    .unwrap();
    let cursor = Cursor::new(&product).unwrap();
    let expr = Expr::parse("str(/doc@unit)").unwrap();
    assert_eq!(expr.eval_string(Some(&cursor)).unwrap(), b"m".to_vec());
    let expr = Expr::parse("float(/doc/v)").unwrap();
    assert_eq!(expr.eval_float(Some(&cursor)).unwrap(), 1.5);

    let mut cursor = Cursor::new(&product).unwrap();
    cursor.goto_record_field_by_name("doc").unwrap();
    cursor.goto_attributes().unwrap();
    assert_eq!(cursor.num_elements().unwrap(), 1);
    assert_eq!(cursor.file_bit_offset().unwrap(), -1);
    cursor.goto_record_field_by_name("unit").unwrap();
    assert_eq!(cursor.read_string().unwrap(), "m");
}

fn sample_netcdf() -> Vec<u8> {
    fn name(bytes: &mut Vec<u8>, text: &str) {
        bytes.extend_from_slice(&(text.len() as u32).to_be_bytes());
        bytes.extend_from_slice(text.as_bytes());
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
    }
    let mut h: Vec<u8> = Vec::new();
    h.extend_from_slice(b"CDF\x01");
    h.extend_from_slice(&0u32.to_be_bytes()); // numrecs
    h.extend_from_slice(&0x0Au32.to_be_bytes()); // dimensions
    h.extend_from_slice(&1u32.to_be_bytes());
    name(&mut h, "x");
    h.extend_from_slice(&3u32.to_be_bytes());
    h.extend_from_slice(&0u32.to_be_bytes()); // no global attributes
    h.extend_from_slice(&0u32.to_be_bytes());
    h.extend_from_slice(&0x0Bu32.to_be_bytes()); // variables
    h.extend_from_slice(&1u32.to_be_bytes());
    name(&mut h, "t");
    h.extend_from_slice(&1u32.to_be_bytes()); // ndims
    h.extend_from_slice(&0u32.to_be_bytes()); // dimid 0
    h.extend_from_slice(&0x0Cu32.to_be_bytes()); // attributes
    h.extend_from_slice(&1u32.to_be_bytes());
    name(&mut h, "scale_factor");
    h.extend_from_slice(&6u32.to_be_bytes()); // double
    h.extend_from_slice(&1u32.to_be_bytes());
    h.extend_from_slice(&0.5f64.to_be_bytes());
    h.extend_from_slice(&3u32.to_be_bytes()); // short
    h.extend_from_slice(&8u32.to_be_bytes()); // vsize
    let begin = (h.len() + 4) as u32;
    h.extend_from_slice(&begin.to_be_bytes());
    for value in [100i16, -200, 300] {
        h.extend_from_slice(&value.to_be_bytes());
    }
    h
}

#[test]
fn netcdf_product_reads() {
    let product = Product::open_memory_self_describing(sample_netcdf()).unwrap();
    assert_eq!(product.format(), Format::NetCdf);
    let mut cursor = Cursor::new(&product).unwrap();
    cursor.goto_record_field_by_name("t").unwrap();
    assert_eq!(cursor.num_elements().unwrap(), 3);

    // scale_factor lifted to a conversion: effective read type is double
    let mut values = [0f64; 3];
    cursor
        .read_double_array(&mut values, ArrayOrdering::C)
        .unwrap();
    assert_eq!(values, [50.0, -100.0, 150.0]);

    set_option_perform_conversions(false);
    let mut raw = [0i32; 3];
    cursor.read_int32_array(&mut raw, ArrayOrdering::C).unwrap();
    assert_eq!(raw, [100, -200, 300]);
    let mut partial = [0i32; 2];
    cursor.read_int32_partial_array(1, 2, &mut partial).unwrap();
    assert_eq!(partial, [-200, 300]);
    set_option_perform_conversions(true);

    // the scale_factor attribute itself is visible
    let expr = Expr::parse("float(/t@scale_factor)").unwrap();
    let root = Cursor::new(&product).unwrap();
    assert_eq!(expr.eval_float(Some(&root)).unwrap(), 0.5);
}

#[test]
fn expression_determinism_and_folding() {
    let product = ascii_array_product(&[4, 8, 15]);
    let cursor = Cursor::new(&product).unwrap();
    let expr = Expr::parse("add(/arr, int(.)) + count(/arr, int(.) > 4)").unwrap();
    let first = expr.eval_integer(Some(&cursor)).unwrap();
    for _ in 0..3 {
        assert_eq!(expr.eval_integer(Some(&cursor)).unwrap(), first);
    }

    let constant = Expr::parse("3 * (4 + 5) % 7").unwrap();
    assert!(constant.is_constant());
    assert_eq!(
        constant.eval_integer(None).unwrap(),
        constant.eval_integer(Some(&cursor)).unwrap()
    );
}

#[test]
fn printed_expressions_reparse_equal() {
    let product = ascii_array_product(&[1, 2, 3]);
    let cursor = Cursor::new(&product).unwrap();
    for text in [
        "count(/arr, int(.) > 1)",
        "if(numelements(/arr) == 3, bytesize(/arr), -1)",
        "strtime(0.0, \"yyyy-MM-dd\")",
    ] {
        let expr = Expr::parse(text).unwrap();
        let reparsed = Expr::parse(&expr.to_text()).unwrap();
        assert_eq!(expr, reparsed);
        if expr.result_kind() == ResultKind::Integer {
            assert_eq!(
                expr.eval_integer(Some(&cursor)).unwrap(),
                reparsed.eval_integer(Some(&cursor)).unwrap()
            );
        }
    }
}

#[test]
fn read_string_into_is_nul_terminated() {
    let product = single_field_product(
        Format::Ascii,
        Type::text(Format::Ascii).with_byte_size(6),
        b"abcdef",
    );
    let cursor = value_cursor(&product);
    let mut buffer = [0xFFu8; 4];
    let written = cursor.read_string_into(&mut buffer).unwrap();
    assert_eq!(written, 3);
    assert_eq!(&buffer, b"abc\0");
    let mut buffer = [0xFFu8; 16];
    let written = cursor.read_string_into(&mut buffer).unwrap();
    assert_eq!(written, 6);
    assert_eq!(&buffer[..7], b"abcdef\0");
}

#[test]
fn raw_bits_and_bytes() {
    let product = single_field_product(
        Format::Binary,
        Type::raw(Format::Binary).with_bit_size(32),
        &[0xDE, 0xAD, 0xBE, 0xEF],
    );
    let cursor = value_cursor(&product);
    let mut bytes = [0u8; 2];
    cursor.read_bytes(1, 2, &mut bytes).unwrap();
    assert_eq!(bytes, [0xAD, 0xBE]);
    let mut bits = [0u8; 1];
    cursor.read_bits(4, 8, &mut bits).unwrap();
    assert_eq!(bits, [0xEA]);
    assert!(matches!(
        cursor.read_bytes(-1, 1, &mut bytes),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn fixed_value_text_validation() {
    let product = single_field_product(
        Format::Ascii,
        Type::text(Format::Ascii).with_fixed_value("HDR"),
        b"HDR",
    );
    let cursor = value_cursor(&product);
    assert_eq!(cursor.read_string().unwrap(), "HDR");
    assert_eq!(cursor.current_type().fixed_value(), Some("HDR"));
}

#[test]
fn open_rejects_collaborator_formats() {
    let dir = std::env::temp_dir();
    let hdf5 = dir.join("coral_test_sample.h5");
    std::fs::write(&hdf5, b"\x89HDF\r\n\x1a\n0000").unwrap();
    assert!(matches!(Product::open(&hdf5), Err(Error::NoHdf5Support)));
    std::fs::remove_file(&hdf5).ok();

    assert!(matches!(
        Product::open_memory_self_describing(b"GRIB0000".to_vec()),
        Err(Error::Product(_))
    ));
}

#[test]
fn cursor_depth_is_bounded() {
    let mut definition = Definition::new();
    let leaf = definition
        .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
        .unwrap();
    let mut inner = leaf;
    for _ in 0..MAX_CURSOR_DEPTH {
        let mut record = Type::record(Format::Binary);
        record.add_field(Field::new("n", inner)).unwrap();
        inner = definition.add(record).unwrap();
    }
    definition.set_root(inner);
    let product = Product::open_memory(definition, vec![1]).unwrap();
    let mut cursor = Cursor::new(&product).unwrap();
    let mut result = Ok(());
    for _ in 0..MAX_CURSOR_DEPTH {
        result = cursor.goto_first_record_field();
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert!(matches!(
        Cursor::new(&product).and_then(|mut c| c.goto_parent()),
        Err(Error::InvalidArgument(_))
    ));
}
