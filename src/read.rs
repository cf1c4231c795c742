//! Typed reads through a cursor: the numeric coercion pipeline and the
//! array engine.
//!
//! Scalar reads accept exactly the stored read types whose value range is
//! contained in the requested type; float and double accept all ten numeric
//! read types (uint64 widens through a signed intermediate). When
//! conversions are enabled and the current type declares one, the effective
//! read type becomes double and the conversion is applied after the raw
//! fetch. Special types are intercepted at double reads.

use num_traits::AsPrimitive;

use crate::backend::{self, ArrayDst};
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::options;
use crate::types::{Conversion, ReadType, SpecialKind, TypeClass, TypeId};

/// Linear layout of a multi-dimensional array: C varies the last dimension
/// fastest, Fortran the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOrdering {
    C,
    Fortran,
}

/// Value-preserving widening copy from the stored element type into the
/// requested one.
fn widen_into<S, T>(stored: Vec<S>, dst: &mut [T])
where
    S: AsPrimitive<T>,
    T: Copy + 'static,
{
    for (slot, value) in dst.iter_mut().zip(stored) {
        *slot = value.as_();
    }
}

/// a ^ b with integer exponent, by exact repeated multiplication.
pub(crate) fn ipow(base: f64, exponent: i32) -> f64 {
    let mut value = 1.0;
    if exponent < 0 {
        for _ in 0..-i64::from(exponent) {
            value *= base;
        }
        1.0 / value
    } else {
        for _ in 0..exponent {
            value *= base;
        }
        value
    }
}

impl<'a> Cursor<'a> {
    fn effective_read_type(&self) -> ReadType {
        let typ = self.current_type();
        if matches!(typ.class(), TypeClass::Integer | TypeClass::Real)
            && options::get().perform_conversions
            && typ.conversion().is_some()
        {
            ReadType::Double
        } else {
            typ.read_type()
        }
    }

    fn unconverted_read_type(&self) -> (ReadType, Option<&'a Conversion>) {
        let typ = self.current_type();
        let conversion = if matches!(typ.class(), TypeClass::Integer | TypeClass::Real)
            && options::get().perform_conversions
        {
            typ.conversion()
        } else {
            None
        };
        (typ.read_type(), conversion)
    }

    fn element_type(&self) -> Result<TypeId> {
        let typ = self.current_type();
        if typ.class() != TypeClass::Array {
            return Err(Error::InvalidType(format!(
                "cursor does not refer to an array (current type is {})",
                typ.class()
            )));
        }
        Ok(typ.array_base().expect("array class"))
    }

    fn element_effective_read_type(&self) -> Result<ReadType> {
        let base = self.product().definition().get(self.element_type()?);
        if matches!(base.class(), TypeClass::Integer | TypeClass::Real)
            && options::get().perform_conversions
            && base.conversion().is_some()
        {
            Ok(ReadType::Double)
        } else {
            Ok(base.read_type())
        }
    }

    fn element_unconverted_read_type(&self) -> Result<(ReadType, Option<&'a Conversion>)> {
        let base = self.product().definition().get(self.element_type()?);
        let conversion = if matches!(base.class(), TypeClass::Integer | TypeClass::Real)
            && options::get().perform_conversions
        {
            base.conversion()
        } else {
            None
        };
        Ok((base.read_type(), conversion))
    }
}

macro_rules! scalar_reads {
    ($($fn_name:ident -> $ty:ty, $name:literal, [$($variant:ident => $fetch:ident),+];)*) => {
        impl<'a> Cursor<'a> {
            $(
                pub fn $fn_name(&self) -> Result<$ty> {
                    match self.effective_read_type() {
                        $(ReadType::$variant => Ok(backend::$fetch(self)? as $ty),)+
                        other => Err(Error::invalid_read(other.name(), $name)),
                    }
                }
            )*
        }
    };
}

scalar_reads! {
    read_int8 -> i8, "int8", [Int8 => read_int8];
    read_uint8 -> u8, "uint8", [UInt8 => read_uint8];
    read_int16 -> i16, "int16",
        [Int8 => read_int8, UInt8 => read_uint8, Int16 => read_int16];
    read_uint16 -> u16, "uint16", [UInt8 => read_uint8, UInt16 => read_uint16];
    read_int32 -> i32, "int32",
        [Int8 => read_int8, UInt8 => read_uint8, Int16 => read_int16,
         UInt16 => read_uint16, Int32 => read_int32];
    read_uint32 -> u32, "uint32",
        [UInt8 => read_uint8, UInt16 => read_uint16, UInt32 => read_uint32];
    read_int64 -> i64, "int64",
        [Int8 => read_int8, UInt8 => read_uint8, Int16 => read_int16,
         UInt16 => read_uint16, Int32 => read_int32, UInt32 => read_uint32,
         Int64 => read_int64];
    read_uint64 -> u64, "uint64",
        [UInt8 => read_uint8, UInt16 => read_uint16, UInt32 => read_uint32,
         UInt64 => read_uint64];
}

impl<'a> Cursor<'a> {
    /// Read the current value as a double, applying declared conversions
    /// and deriving the value of special types.
    pub fn read_double(&self) -> Result<f64> {
        let typ = self.current_type();
        if typ.class() == TypeClass::Special {
            return match typ.special_kind().expect("special class") {
                SpecialKind::Time => self.read_time(),
                SpecialKind::VsfInteger => self.read_vsf_integer(),
                kind => Err(Error::invalid_read(kind.name(), "double")),
            };
        }
        let (read_type, conversion) = self.unconverted_read_type();
        let value = fetch_as_double(self, read_type, "double")?;
        match conversion {
            Some(conversion) => Ok(conversion.apply(value)),
            None => Ok(value),
        }
    }

    pub fn read_float(&self) -> Result<f32> {
        Ok(self.read_double()? as f32)
    }

    fn read_time(&self) -> Result<f64> {
        let typ = self.current_type();
        let expr = typ.special_value_expr().ok_or_else(|| {
            Error::DataDefinition("time type has no value expression".to_owned())
        })?;
        let mut base = self.clone();
        base.use_base_type_of_special_type()?;
        expr.eval_float(Some(&base))
    }

    /// scale factor comes before the value
    fn read_vsf_integer(&self) -> Result<f64> {
        let mut vsf = self.clone();
        vsf.use_base_type_of_special_type()?;
        vsf.goto_first_record_field()?;
        let scale_factor = vsf.read_int32()?;
        vsf.goto_next_record_field()?;
        let value = vsf.read_double()?;
        Ok(value * ipow(10.0, -scale_factor))
    }

    pub fn read_char(&self) -> Result<u8> {
        match self.effective_read_type() {
            ReadType::Char => backend::read_char(self),
            other => Err(Error::invalid_read(other.name(), "char")),
        }
    }

    /// Read the text payload of the current node as an owned string.
    /// Non-UTF-8 bytes are replaced.
    pub fn read_string(&self) -> Result<String> {
        if !self.has_ascii_content()? {
            return Err(Error::InvalidType(
                "cursor does not refer to text".to_owned(),
            ));
        }
        let mut buffer = Vec::new();
        backend::read_string_into(self, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Read text into `dst`, NUL-terminated: at most `dst.len() - 1`
    /// content bytes are written. Returns the content byte count.
    pub fn read_string_into(&self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Err(Error::InvalidArgument(
                "destination buffer is empty".to_owned(),
            ));
        }
        if !self.has_ascii_content()? {
            return Err(Error::InvalidType(
                "cursor does not refer to text".to_owned(),
            ));
        }
        let mut buffer = Vec::new();
        backend::read_string_into(self, &mut buffer)?;
        let count = buffer.len().min(dst.len() - 1);
        dst[..count].copy_from_slice(&buffer[..count]);
        dst[count] = 0;
        Ok(count)
    }

    /// Read `bit_length` bits starting `bit_offset` bits past the current
    /// node, right adjusted in `dst`.
    pub fn read_bits(&self, bit_offset: i64, bit_length: i64, dst: &mut [u8]) -> Result<()> {
        if bit_length < 0 {
            return Err(Error::InvalidArgument(
                "bit_length argument is negative".to_owned(),
            ));
        }
        if bit_length == 0 {
            return Ok(());
        }
        backend::read_bits(self, bit_offset, bit_length, dst)
    }

    /// Read `length` bytes starting `offset` bytes past the current node.
    pub fn read_bytes(&self, offset: i64, length: i64, dst: &mut [u8]) -> Result<()> {
        if offset < 0 {
            return Err(Error::InvalidArgument(
                "offset argument is negative".to_owned(),
            ));
        }
        if length < 0 {
            return Err(Error::InvalidArgument(
                "length argument is negative".to_owned(),
            ));
        }
        if length == 0 {
            return Ok(());
        }
        backend::read_bytes(self, offset, length, dst)
    }

    fn check_whole_array(&self, dst_len: usize) -> Result<i64> {
        let num_elements = self.num_elements()?;
        if dst_len as i64 != num_elements {
            return Err(Error::InvalidArgument(format!(
                "destination buffer ({dst_len} elements) does not match array size \
                 ({num_elements} elements)"
            )));
        }
        Ok(num_elements)
    }

    fn check_partial_array(&self, offset: i64, length: i64, dst_len: usize) -> Result<()> {
        let num_elements = self.num_elements()?;
        if offset < 0 || offset >= num_elements.max(1) || offset + length > num_elements {
            return Err(Error::ArrayOutOfBounds(format!(
                "array range [{offset}:{}) exceeds array range [0:{num_elements})",
                offset + length
            )));
        }
        if dst_len as i64 != length {
            return Err(Error::InvalidArgument(format!(
                "destination buffer ({dst_len} elements) does not match requested length \
                 ({length} elements)"
            )));
        }
        Ok(())
    }

    fn fortran_transpose<T: Copy>(&self, dst: &mut [T]) -> Result<()> {
        let (num_dims, dims) = self.array_dim()?;
        transpose(&dims[..num_dims], dst);
        Ok(())
    }
}

fn fetch_as_double(cursor: &Cursor, read_type: ReadType, requested: &str) -> Result<f64> {
    Ok(match read_type {
        ReadType::Int8 => f64::from(backend::read_int8(cursor)?),
        ReadType::UInt8 => f64::from(backend::read_uint8(cursor)?),
        ReadType::Int16 => f64::from(backend::read_int16(cursor)?),
        ReadType::UInt16 => f64::from(backend::read_uint16(cursor)?),
        ReadType::Int32 => f64::from(backend::read_int32(cursor)?),
        ReadType::UInt32 => f64::from(backend::read_uint32(cursor)?),
        ReadType::Int64 => backend::read_int64(cursor)? as f64,
        // widened through the signed intermediate
        ReadType::UInt64 => backend::read_uint64(cursor)? as i64 as f64,
        ReadType::Float => f64::from(backend::read_float(cursor)?),
        ReadType::Double => backend::read_double(cursor)?,
        other => return Err(Error::invalid_read(other.name(), requested)),
    })
}

macro_rules! integer_array_reads {
    ($($array_fn:ident, $partial_fn:ident -> $ty:ty, $name:literal, $own:ident,
       [$($variant:ident : $stored:ty),*];)*) => {
        impl<'a> Cursor<'a> {
            $(
                pub fn $array_fn(
                    &self,
                    dst: &mut [$ty],
                    ordering: ArrayOrdering,
                ) -> Result<()> {
                    self.check_whole_array(dst.len())?;
                    match self.element_effective_read_type()? {
                        ReadType::$own => {
                            backend::read_array(self, ArrayDst::$own(dst))?;
                        }
                        $(
                            ReadType::$variant => {
                                let mut stored = vec![<$stored>::default(); dst.len()];
                                backend::read_array(
                                    self,
                                    ArrayDst::$variant(&mut stored[..]),
                                )?;
                                widen_into(stored, dst);
                            }
                        )*
                        other => return Err(Error::invalid_read(other.name(), $name)),
                    }
                    if ordering == ArrayOrdering::Fortran {
                        self.fortran_transpose(dst)?;
                    }
                    Ok(())
                }

                pub fn $partial_fn(
                    &self,
                    offset: i64,
                    length: i64,
                    dst: &mut [$ty],
                ) -> Result<()> {
                    self.check_partial_array(offset, length, dst.len())?;
                    match self.element_effective_read_type()? {
                        ReadType::$own => {
                            backend::read_partial_array(
                                self,
                                offset,
                                length,
                                ArrayDst::$own(dst),
                            )?;
                        }
                        $(
                            ReadType::$variant => {
                                let mut stored = vec![<$stored>::default(); dst.len()];
                                backend::read_partial_array(
                                    self,
                                    offset,
                                    length,
                                    ArrayDst::$variant(&mut stored[..]),
                                )?;
                                widen_into(stored, dst);
                            }
                        )*
                        other => return Err(Error::invalid_read(other.name(), $name)),
                    }
                    Ok(())
                }
            )*
        }
    };
}

integer_array_reads! {
    read_int8_array, read_int8_partial_array -> i8, "int8", Int8, [];
    read_uint8_array, read_uint8_partial_array -> u8, "uint8", UInt8, [];
    read_int16_array, read_int16_partial_array -> i16, "int16", Int16,
        [Int8: i8, UInt8: u8];
    read_uint16_array, read_uint16_partial_array -> u16, "uint16", UInt16, [UInt8: u8];
    read_int32_array, read_int32_partial_array -> i32, "int32", Int32,
        [Int8: i8, UInt8: u8, Int16: i16, UInt16: u16];
    read_uint32_array, read_uint32_partial_array -> u32, "uint32", UInt32,
        [UInt8: u8, UInt16: u16];
    read_int64_array, read_int64_partial_array -> i64, "int64", Int64,
        [Int8: i8, UInt8: u8, Int16: i16, UInt16: u16, Int32: i32, UInt32: u32];
    read_uint64_array, read_uint64_partial_array -> u64, "uint64", UInt64,
        [UInt8: u8, UInt16: u16, UInt32: u32];
}

impl<'a> Cursor<'a> {
    /// Per-element walk for arrays whose base type needs scalar evaluation
    /// (special types, conversions).
    fn read_double_array_by_element(
        &self,
        offset: i64,
        dst: &mut [f64],
    ) -> Result<()> {
        let mut element = self.clone();
        for (i, slot) in dst.iter_mut().enumerate() {
            if i == 0 {
                element.goto_array_element_by_index(offset)?;
            } else {
                element.goto_next_array_element()?;
            }
            *slot = element.read_double()?;
        }
        Ok(())
    }

    pub fn read_double_array(&self, dst: &mut [f64], ordering: ArrayOrdering) -> Result<()> {
        self.check_whole_array(dst.len())?;
        let base = self.product().definition().get(self.element_type()?);
        if base.class() == TypeClass::Special {
            // arrays of special types are explicitly iterated
            self.read_double_array_by_element(0, dst)?;
            if ordering == ArrayOrdering::Fortran {
                self.fortran_transpose(dst)?;
            }
            return Ok(());
        }
        let (read_type, conversion) = self.element_unconverted_read_type()?;
        self.fetch_double_array(read_type, conversion, None, dst)?;
        if ordering == ArrayOrdering::Fortran {
            self.fortran_transpose(dst)?;
        }
        Ok(())
    }

    pub fn read_double_partial_array(
        &self,
        offset: i64,
        length: i64,
        dst: &mut [f64],
    ) -> Result<()> {
        self.check_partial_array(offset, length, dst.len())?;
        let base = self.product().definition().get(self.element_type()?);
        if base.class() == TypeClass::Special {
            return self.read_double_array_by_element(offset, dst);
        }
        let (read_type, conversion) = self.element_unconverted_read_type()?;
        self.fetch_double_array(read_type, conversion, Some((offset, length)), dst)
    }

    fn fetch_double_array(
        &self,
        read_type: ReadType,
        conversion: Option<&Conversion>,
        window: Option<(i64, i64)>,
        dst: &mut [f64],
    ) -> Result<()> {
        macro_rules! fetch {
            ($variant:ident, $stored:ty) => {{
                let mut stored = vec![<$stored>::default(); dst.len()];
                self.bulk(window, ArrayDst::$variant(&mut stored[..]))?;
                widen_into(stored, dst);
            }};
        }
        match read_type {
            ReadType::Int8 => fetch!(Int8, i8),
            ReadType::UInt8 => fetch!(UInt8, u8),
            ReadType::Int16 => fetch!(Int16, i16),
            ReadType::UInt16 => fetch!(UInt16, u16),
            ReadType::Int32 => fetch!(Int32, i32),
            ReadType::UInt32 => fetch!(UInt32, u32),
            ReadType::Int64 => fetch!(Int64, i64),
            ReadType::UInt64 => {
                let mut stored = vec![0u64; dst.len()];
                self.bulk(window, ArrayDst::UInt64(&mut stored[..]))?;
                for (slot, value) in dst.iter_mut().zip(stored) {
                    *slot = value as i64 as f64;
                }
            }
            ReadType::Float => fetch!(Float, f32),
            ReadType::Double => self.bulk(window, ArrayDst::Double(dst))?,
            other => return Err(Error::invalid_read(other.name(), "double")),
        }
        if let Some(conversion) = conversion {
            for slot in dst.iter_mut() {
                *slot = conversion.apply(*slot);
            }
        }
        Ok(())
    }

    fn bulk(&self, window: Option<(i64, i64)>, dst: ArrayDst<'_>) -> Result<()> {
        match window {
            Some((offset, length)) => backend::read_partial_array(self, offset, length, dst),
            None => backend::read_array(self, dst),
        }
    }

    pub fn read_float_array(&self, dst: &mut [f32], ordering: ArrayOrdering) -> Result<()> {
        let mut buffer = vec![0f64; dst.len()];
        self.read_double_array(&mut buffer, ordering)?;
        for (slot, value) in dst.iter_mut().zip(buffer) {
            *slot = value as f32;
        }
        Ok(())
    }

    pub fn read_float_partial_array(
        &self,
        offset: i64,
        length: i64,
        dst: &mut [f32],
    ) -> Result<()> {
        let mut buffer = vec![0f64; dst.len()];
        self.read_double_partial_array(offset, length, &mut buffer)?;
        for (slot, value) in dst.iter_mut().zip(buffer) {
            *slot = value as f32;
        }
        Ok(())
    }

    pub fn read_char_array(&self, dst: &mut [u8], ordering: ArrayOrdering) -> Result<()> {
        self.check_whole_array(dst.len())?;
        match self.element_effective_read_type()? {
            ReadType::Char => backend::read_array(self, ArrayDst::Char(dst))?,
            other => return Err(Error::invalid_read(other.name(), "char")),
        }
        if ordering == ArrayOrdering::Fortran {
            self.fortran_transpose(dst)?;
        }
        Ok(())
    }

    pub fn read_char_partial_array(
        &self,
        offset: i64,
        length: i64,
        dst: &mut [u8],
    ) -> Result<()> {
        self.check_partial_array(offset, length, dst.len())?;
        match self.element_effective_read_type()? {
            ReadType::Char => backend::read_partial_array(self, offset, length, ArrayDst::Char(dst)),
            other => Err(Error::invalid_read(other.name(), "char")),
        }
    }

    // ---- complex reads ----

    fn complex_base(&self) -> Result<Cursor<'a>> {
        let typ = self.current_type();
        if typ.special_kind() != Some(SpecialKind::Complex) {
            return Err(Error::InvalidType(
                "can not read this data using a paired double data type".to_owned(),
            ));
        }
        let mut pair = self.clone();
        pair.use_base_type_of_special_type()?;
        Ok(pair)
    }

    /// Interleaved `[re, im]` pair of the current complex value.
    pub fn read_complex_double_pair(&self) -> Result<[f64; 2]> {
        let mut pair = self.complex_base()?;
        pair.goto_record_field_by_index(0)?;
        let re = pair.read_double()?;
        pair.goto_next_record_field()?;
        let im = pair.read_double()?;
        Ok([re, im])
    }

    pub fn read_complex_double_split(&self) -> Result<(f64, f64)> {
        let [re, im] = self.read_complex_double_pair()?;
        Ok((re, im))
    }

    /// Interleaved pairs of a complex array: `dst` holds `2 * N` doubles.
    pub fn read_complex_double_pairs_array(
        &self,
        dst: &mut [f64],
        ordering: ArrayOrdering,
    ) -> Result<()> {
        let num_elements = self.num_elements()?;
        if dst.len() as i64 != 2 * num_elements {
            return Err(Error::InvalidArgument(format!(
                "destination buffer ({} doubles) does not match complex array size \
                 ({num_elements} pairs)",
                dst.len()
            )));
        }
        let mut element = self.clone();
        for i in 0..num_elements {
            if i == 0 {
                element.goto_first_array_element()?;
            } else {
                element.goto_next_array_element()?;
            }
            let pair = element.read_complex_double_pair()?;
            dst[2 * i as usize] = pair[0];
            dst[2 * i as usize + 1] = pair[1];
        }
        if ordering == ArrayOrdering::Fortran {
            let (num_dims, dims) = self.array_dim()?;
            transpose_pairs(&dims[..num_dims], dst);
        }
        Ok(())
    }

    /// Split form of a complex array: reals into `dst_re`, imaginaries
    /// into `dst_im`.
    pub fn read_complex_double_split_array(
        &self,
        dst_re: &mut [f64],
        dst_im: &mut [f64],
        ordering: ArrayOrdering,
    ) -> Result<()> {
        let num_elements = self.check_whole_array(dst_re.len())?;
        if dst_im.len() as i64 != num_elements {
            return Err(Error::InvalidArgument(format!(
                "destination buffer ({} elements) does not match array size \
                 ({num_elements} elements)",
                dst_im.len()
            )));
        }
        let order = fortran_order(self, ordering, num_elements)?;
        let mut element = self.clone();
        for c_index in 0..num_elements as usize {
            if c_index == 0 {
                element.goto_first_array_element()?;
            } else {
                element.goto_next_array_element()?;
            }
            let pair = element.read_complex_double_pair()?;
            let target = order
                .as_ref()
                .map(|order| order[c_index])
                .unwrap_or(c_index);
            dst_re[target] = pair[0];
            dst_im[target] = pair[1];
        }
        Ok(())
    }
}

/// The Fortran position of each C-order element, or `None` for C order /
/// rank <= 1.
fn fortran_order(
    cursor: &Cursor,
    ordering: ArrayOrdering,
    num_elements: i64,
) -> Result<Option<Vec<usize>>> {
    if ordering != ArrayOrdering::Fortran {
        return Ok(None);
    }
    let (num_dims, dims) = cursor.array_dim()?;
    if num_dims <= 1 {
        return Ok(None);
    }
    let mut order = vec![0usize; num_elements as usize];
    for (c_index, slot) in order.iter_mut().enumerate() {
        *slot = fortran_index(&dims[..num_dims], c_index);
    }
    Ok(Some(order))
}

fn fortran_index(dims: &[i64], c_index: usize) -> usize {
    let mut remainder = c_index;
    let mut fortran = 0usize;
    // Fortran strides: prefix products of the extents
    let mut strides = vec![1usize; dims.len()];
    for d in 1..dims.len() {
        strides[d] = strides[d - 1] * dims[d - 1] as usize;
    }
    for d in (0..dims.len()).rev() {
        let sub = remainder % dims[d] as usize;
        remainder /= dims[d] as usize;
        fortran += sub * strides[d];
    }
    fortran
}

/// Reorder a C-order buffer into Fortran order in place.
///
/// Walks a Fortran index alongside the C index; when the Fortran index
/// rolls past the end it is carried down the precomputed prefix products
/// of the extents.
pub(crate) fn transpose<T: Copy>(dims: &[i64], data: &mut [T]) {
    let num_dims = dims.len();
    if num_dims <= 1 {
        return;
    }
    let mut incr = vec![1i64; num_dims + 1];
    for d in 0..num_dims {
        incr[d + 1] = incr[d] * dims[d];
    }
    let num_elements = incr[num_dims];
    if num_elements <= 1 {
        return;
    }
    let src: Vec<T> = data.to_vec();
    let increment = incr[num_dims - 1];
    let mut c_index: i64 = 0;
    let mut fortran_index: i64 = 0;
    loop {
        loop {
            data[fortran_index as usize] = src[c_index as usize];
            c_index += 1;
            fortran_index += increment;
            if fortran_index >= num_elements {
                break;
            }
        }
        if c_index == num_elements {
            break;
        }
        fortran_index += incr[num_dims - 2] - incr[num_dims];
        let mut d = num_dims as i64 - 3;
        while d >= 0 && fortran_index >= incr[(d + 2) as usize] {
            fortran_index += incr[d as usize] - incr[(d + 2) as usize];
            d -= 1;
        }
    }
}

fn transpose_pairs(dims: &[i64], data: &mut [f64]) {
    if dims.len() <= 1 {
        return;
    }
    let pairs: Vec<[f64; 2]> = data
        .chunks_exact(2)
        .map(|chunk| [chunk[0], chunk[1]])
        .collect();
    let mut reordered = pairs;
    transpose(dims, &mut reordered);
    for (chunk, pair) in data.chunks_exact_mut(2).zip(reordered) {
        chunk[0] = pair[0];
        chunk[1] = pair[1];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transpose_2x3() {
        let mut data = [1, 2, 3, 4, 5, 6];
        transpose(&[2, 3], &mut data);
        assert_eq!(data, [1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn transpose_involution() {
        let dims = [2i64, 3, 4];
        let original: Vec<i32> = (0..24).collect();
        let mut data = original.clone();
        transpose(&dims, &mut data);
        let reversed = [4i64, 3, 2];
        transpose(&reversed, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn transpose_rank_one_is_identity() {
        let mut data = [1, 2, 3];
        transpose(&[3], &mut data);
        assert_eq!(data, [1, 2, 3]);
    }

    #[test]
    fn ipow_matches_scaling() {
        assert_eq!(ipow(10.0, 2), 100.0);
        assert_eq!(ipow(10.0, -2), 0.01);
        assert_eq!(ipow(2.0, 0), 1.0);
    }

    #[test]
    fn fortran_index_2x3() {
        // C order [a00 a01 a02 a10 a11 a12] -> Fortran positions
        let dims = [2i64, 3];
        let order: Vec<usize> = (0..6).map(|i| fortran_index(&dims, i)).collect();
        assert_eq!(order, vec![0, 2, 4, 1, 3, 5]);
    }
}
