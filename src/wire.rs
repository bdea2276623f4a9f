//! The binary format served to the rendering client.
//!
//! Every blob starts with a 40-byte header:
//!
//! | offset | field       | encoding                  |
//! |--------|-------------|---------------------------|
//! | 0      | `width`     | `u32`, big-endian         |
//! | 4      | `height`    | `u32`, big-endian         |
//! | 8      | `depth`     | `u32`, big-endian         |
//! | 12     | `data_type` | `u32`, big-endian         |
//! | 16     | reserved    | 24 zero bytes             |
//!
//! followed by `width * height * depth` samples of 4 bytes each, always
//! little-endian. For an array of shape `(d0, d1, d2)` the header reports
//! `width = d0`, `height = d1`, `depth = d2` and the samples follow the
//! array's logical row-major order, so `depth` varies fastest: voxel
//! `(i, j, k)` is sample number `(i * height + j) * depth + k`.

use crate::enums::DataType;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ndarray::Array3;
use thiserror::Error;

pub const HEADER_LEN: usize = 40;
const RESERVED_LEN: usize = HEADER_LEN - 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub data_type: DataType,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("Blob too short for a header: {0} bytes")]
    Truncated(usize),

    #[error("Unknown data type {0}")]
    UnknownDataType(u32),

    #[error("Reserved header bytes are not zero")]
    DirtyReserved,

    #[error("Axis length {0} does not fit the header")]
    AxisTooLong(usize),
}

impl WireHeader {
    /// Header for an array of shape `(d0, d1, d2)`. Fails when an axis is
    /// longer than `u32::MAX`.
    pub fn for_shape((d0, d1, d2): (usize, usize, usize), data_type: DataType) -> Result<Self, WireError> {
        let axis = |len: usize| u32::try_from(len).map_err(|_| WireError::AxisTooLong(len));
        Ok(Self {
            width: axis(d0)?,
            height: axis(d1)?,
            depth: axis(d2)?,
            data_type,
        })
    }

    pub fn voxel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Total blob length announced by this header.
    pub fn blob_len(&self) -> usize {
        HEADER_LEN + self.voxel_count() * self.data_type.sample_size()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.width);
        buf.put_u32(self.height);
        buf.put_u32(self.depth);
        buf.put_u32(self.data_type.code());
        buf.put_bytes(0, RESERVED_LEN);
    }

    pub fn decode(mut blob: &[u8]) -> Result<Self, WireError> {
        if blob.len() < HEADER_LEN {
            return Err(WireError::Truncated(blob.len()));
        }
        let width = blob.get_u32();
        let height = blob.get_u32();
        let depth = blob.get_u32();
        let code = blob.get_u32();
        let data_type = DataType::from_code(code).ok_or(WireError::UnknownDataType(code))?;
        if blob[..RESERVED_LEN].iter().any(|&b| b != 0) {
            return Err(WireError::DirtyReserved);
        }

        Ok(Self {
            width,
            height,
            depth,
            data_type,
        })
    }
}

/// Serializes processed volumes into the wire format.
pub struct BinaryPacker;

impl BinaryPacker {
    /// Pack normalized intensities (`data_type = 1`).
    ///
    /// The result is exactly `40 + d0 * d1 * d2 * 4` bytes long.
    pub fn pack(data: &Array3<f32>) -> Result<Bytes, WireError> {
        let header = WireHeader::for_shape(data.dim(), DataType::Float32)?;
        let mut buf = BytesMut::with_capacity(header.blob_len());
        header.encode(&mut buf);

        match data.as_slice() {
            Some(samples) if cfg!(target_endian = "little") => {
                buf.put_slice(bytemuck::cast_slice(samples));
            }
            _ => data.iter().for_each(|&value| buf.put_f32_le(value)),
        }

        Ok(buf.freeze())
    }

    /// Pack integer region labels (`data_type = 2`).
    pub fn pack_labels(data: &Array3<u32>) -> Result<Bytes, WireError> {
        let header = WireHeader::for_shape(data.dim(), DataType::LabelU32)?;
        let mut buf = BytesMut::with_capacity(header.blob_len());
        header.encode(&mut buf);

        match data.as_slice() {
            Some(samples) if cfg!(target_endian = "little") => {
                buf.put_slice(bytemuck::cast_slice(samples));
            }
            _ => data.iter().for_each(|&value| buf.put_u32_le(value)),
        }

        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, ShapeBuilder};

    fn payload_f32(blob: &[u8]) -> Vec<f32> {
        blob[HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn header_reports_axes_in_array_order() {
        let blob = BinaryPacker::pack(&Array3::zeros((2, 3, 4))).unwrap();

        assert_eq!(&blob[0..4], &2u32.to_be_bytes());
        assert_eq!(&blob[4..8], &3u32.to_be_bytes());
        assert_eq!(&blob[8..12], &4u32.to_be_bytes());
        assert_eq!(&blob[12..16], &1u32.to_be_bytes());
        assert!(blob[16..HEADER_LEN].iter().all(|&b| b == 0));
    }

    #[test]
    fn blob_length_matches_shape() {
        for shape in [(1, 1, 1), (2, 3, 4), (5, 1, 7), (0, 3, 3)] {
            let blob = BinaryPacker::pack(&Array3::zeros(shape)).unwrap();
            assert_eq!(blob.len(), HEADER_LEN + shape.0 * shape.1 * shape.2 * 4);
        }
    }

    #[test]
    fn payload_is_row_major_for_any_memory_layout() {
        let c_order = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 12 + j * 4 + k) as f32);
        let mut f_order = Array::zeros((2, 3, 4).f());
        f_order.assign(&c_order);

        let expected: Vec<f32> = (0..24).map(|v| v as f32).collect();
        assert_eq!(payload_f32(&BinaryPacker::pack(&c_order).unwrap()), expected);
        assert_eq!(payload_f32(&BinaryPacker::pack(&f_order).unwrap()), expected);
    }

    #[test]
    fn labels_use_their_own_data_type() {
        let labels = Array3::from_shape_vec((1, 2, 2), vec![0u32, 1, 2, 70_000]).unwrap();
        let blob = BinaryPacker::pack_labels(&labels).unwrap();
        let header = WireHeader::decode(&blob).unwrap();

        assert_eq!(header.data_type, DataType::LabelU32);
        assert_eq!(header.blob_len(), blob.len());
        let values: Vec<u32> = blob[HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0, 1, 2, 70_000]);
    }

    #[test]
    fn decode_reads_back_packed_header() {
        let blob = BinaryPacker::pack(&Array3::zeros((4, 5, 6))).unwrap();
        let header = WireHeader::decode(&blob).unwrap();
        assert_eq!(
            header,
            WireHeader {
                width: 4,
                height: 5,
                depth: 6,
                data_type: DataType::Float32,
            }
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_axes_are_rejected() {
        let too_long = u32::MAX as usize + 1;
        assert_eq!(
            WireHeader::for_shape((2, too_long, 2), DataType::Float32),
            Err(WireError::AxisTooLong(too_long))
        );
        let max = u32::MAX as usize;
        assert_eq!(
            WireHeader::for_shape((max, 1, 1), DataType::LabelU32).map(|h| h.width),
            Ok(u32::MAX)
        );
    }

    #[test]
    fn decode_rejects_malformed_headers() {
        assert_eq!(WireHeader::decode(&[0; 12]), Err(WireError::Truncated(12)));

        let mut blob = BinaryPacker::pack(&Array3::zeros((1, 1, 1))).unwrap().to_vec();
        blob[15] = 9;
        assert_eq!(WireHeader::decode(&blob), Err(WireError::UnknownDataType(9)));

        blob[15] = 1;
        blob[30] = 1;
        assert_eq!(WireHeader::decode(&blob), Err(WireError::DirtyReserved));
    }
}
