//! SCANCO AIM 格式.
//!
//! 文件由四个连续的块组成: pre-header, image struct, 处理日志, 体素数据.
//! pre-header 依次给出各块的字节长度 (pre-header, struct, 日志, 数据, assoc).
//!
//! v020 的 pre-header 与 struct 使用 32 位整数, 体素尺寸以 VAX F-float 存储;
//! v030 以 `AIMDATA_V030` 魔数开头, 使用 64 位整数, 体素尺寸以 1e-6 mm 为单位的整数存储.
//! 体素数据均为小端序, x 最快变化.
//!
//! 只写出 v020.

use std::fmt::Display;
use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::aim::*;
use crate::data::{Extent, ScalarType, Volume};
use crate::error::{invalid, IplError, IplResult};
use crate::io::{bytes_per_voxel, decode_scalars, encode_scalars};
use crate::proc_log::ProcessingLog;

/// v020 struct 中整数字段的个数 (体素尺寸之前).
const V020_INTS: usize = 27;

/// v020 struct 中体素尺寸的字节位置.
const V020_EL_SIZE_AT: usize = V020_INTS * 4;

/// v030 struct 中体素尺寸的字节位置.
const V030_EL_SIZE_AT: usize = 216;

/// v030 体素尺寸的整数单位 (mm).
const V030_EL_SIZE_UNIT: f64 = 1e-6;

/// struct 的版本字段值.
const V020_VERSION: i32 = 20;

#[inline]
fn corrupt(what: impl Display) -> IplError {
    IplError::UnsupportedFormat(format!("corrupt AIM file: {what}"))
}

/// 由类型码获取标量类型.
pub fn scalar_type_of(code: u32) -> IplResult<ScalarType> {
    match code {
        TYPE_CHAR => Ok(ScalarType::I8),
        TYPE_SHORT => Ok(ScalarType::I16),
        TYPE_FLOAT => Ok(ScalarType::F32),
        other => Err(IplError::UnsupportedFormat(format!(
            "AIM type code {other:#010x}"
        ))),
    }
}

/// 标量类型的类型码.
pub fn type_code(ty: ScalarType) -> u32 {
    match ty {
        ScalarType::I8 => TYPE_CHAR,
        ScalarType::I16 => TYPE_SHORT,
        ScalarType::F32 => TYPE_FLOAT,
    }
}

/// VAX F-float 转为 IEEE 单精度.
///
/// VAX 以 16 位字为单位交换字序, 且指数偏移比 IEEE 大 2, 因此交换字节后除以 4.
pub fn vax_to_f32(b: [u8; 4]) -> f32 {
    let bits = (b[1] as u32) << 24 | (b[0] as u32) << 16 | (b[3] as u32) << 8 | b[2] as u32;
    f32::from_bits(bits) / 4.0
}

/// IEEE 单精度转为 VAX F-float. [`vax_to_f32`] 的逆运算.
pub fn f32_to_vax(v: f32) -> [u8; 4] {
    let bits = (v * 4.0).to_bits();
    [
        (bits >> 16) as u8,
        (bits >> 24) as u8,
        bits as u8,
        (bits >> 8) as u8,
    ]
}

/// 从文件头解析出的几何与类型信息.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Header {
    ty: ScalarType,
    pos: [i64; 3],
    dim: [usize; 3],
    off: [usize; 3],
    el_size: [f64; 3],
}

/// 从 `bytes` 的 `at` 处截取 `len` 字节.
#[inline]
fn block<'a>(bytes: &'a [u8], at: usize, len: usize, what: &str) -> IplResult<&'a [u8]> {
    at.checked_add(len)
        .and_then(|end| bytes.get(at..end))
        .ok_or_else(|| corrupt(format!("{what} block truncated")))
}

#[inline]
fn to_len(v: i64, what: &str) -> IplResult<usize> {
    usize::try_from(v).map_err(|_| corrupt(format!("negative {what} {v}")))
}

fn header_v020(s: &[u8]) -> IplResult<Header> {
    let mut ints = [0i32; V020_INTS];
    LittleEndian::read_i32_into(&s[..V020_EL_SIZE_AT], &mut ints);
    let at = |i: usize| [ints[i] as i64, ints[i + 1] as i64, ints[i + 2] as i64];
    let (pos, dim, off) = (at(6), at(9), at(12));
    let mut el_size = [0.0; 3];
    for (a, e) in el_size.iter_mut().enumerate() {
        let p = V020_EL_SIZE_AT + 4 * a;
        *e = vax_to_f32([s[p], s[p + 1], s[p + 2], s[p + 3]]) as f64;
    }
    Ok(Header {
        ty: scalar_type_of(ints[5] as u32)?,
        pos,
        dim: [to_len(dim[0], "dim")?, to_len(dim[1], "dim")?, to_len(dim[2], "dim")?],
        off: [to_len(off[0], "off")?, to_len(off[1], "off")?, to_len(off[2], "off")?],
        el_size,
    })
}

fn header_v030(s: &[u8]) -> IplResult<Header> {
    let mut longs = [0i64; V030_STRUCT_LEN / 8];
    LittleEndian::read_i64_into(s, &mut longs);
    let at = |i: usize| [longs[i], longs[i + 1], longs[i + 2]];
    let (pos, dim, off) = (at(6), at(9), at(12));
    let el = at(V030_EL_SIZE_AT / 8);
    Ok(Header {
        ty: scalar_type_of(LittleEndian::read_u32(&s[40..44]))?,
        pos,
        dim: [to_len(dim[0], "dim")?, to_len(dim[1], "dim")?, to_len(dim[2], "dim")?],
        off: [to_len(off[0], "off")?, to_len(off[1], "off")?, to_len(off[2], "off")?],
        el_size: el.map(|e| e as f64 * V030_EL_SIZE_UNIT),
    })
}

/// 解析内存中的 AIM 文件.
pub fn decode(bytes: &[u8]) -> IplResult<Volume> {
    // 各块长度: pre-header, struct, 日志, 数据.
    let (lens, header) = if bytes.starts_with(&V030_MAGIC[..12]) {
        let pre = block(bytes, 0, V030_PRE_HEADER_LEN, "pre-header")?;
        let mut raw = [0i64; 5];
        LittleEndian::read_i64_into(&pre[V030_MAGIC.len()..], &mut raw);
        let mut lens = [0usize; 4];
        for (l, r) in lens.iter_mut().zip(raw) {
            *l = to_len(r, "block length")?;
        }
        if lens[1] < V030_STRUCT_LEN {
            return Err(corrupt("v030 struct too short"));
        }
        let s = block(bytes, lens[0], V030_STRUCT_LEN, "struct")?;
        (lens, header_v030(s)?)
    } else {
        let pre = block(bytes, 0, V020_PRE_HEADER_LEN, "pre-header")?;
        let mut raw = [0i32; 5];
        LittleEndian::read_i32_into(pre, &mut raw);
        let mut lens = [0usize; 4];
        for (l, r) in lens.iter_mut().zip(raw) {
            *l = to_len(r as i64, "block length")?;
        }
        if lens[0] != V020_PRE_HEADER_LEN || lens[1] < V020_STRUCT_LEN {
            return Err(IplError::UnsupportedFormat(
                "not an AIM v020 or v030 file".into(),
            ));
        }
        let s = block(bytes, lens[0], V020_STRUCT_LEN, "struct")?;
        (lens, header_v020(s)?)
    };
    log::debug!("AIM header: {header:?}");

    let log_at = lens[0]
        .checked_add(lens[1])
        .ok_or_else(|| corrupt("block lengths overflow"))?;
    let text = block(bytes, log_at, lens[2], "log")?;
    let text = String::from_utf8_lossy(text);
    let text = text.trim_end_matches('\0');

    // 先核对数据块长度, 再分配.
    let need = header
        .dim
        .iter()
        .try_fold(bytes_per_voxel(header.ty), |n, d| n.checked_mul(*d))
        .ok_or_else(|| corrupt(format!("dimensions {:?} overflow", header.dim)))?;
    if lens[3] < need {
        return Err(corrupt(format!("data block holds {} bytes, {need} expected", lens[3])));
    }
    let data = block(bytes, log_at + lens[2], need, "data")?;
    let extent = Extent::from_dims(header.pos, header.dim).map_err(corrupt)?;
    let scalars = decode_scalars(data, header.ty, extent.shape())?;

    Ok(Volume::new(extent, header.el_size, scalars)
        .map_err(corrupt)?
        .with_offset(header.off)
        .with_log(ProcessingLog::new(text)))
}

#[inline]
fn to_i32(v: i64, what: &str) -> IplResult<i32> {
    match i32::try_from(v) {
        Ok(v) => Ok(v),
        Err(_) => invalid!("{what} {v} does not fit an AIM v020 header"),
    }
}

/// 将体数据编码为 AIM v020.
pub fn encode(vol: &Volume) -> IplResult<Vec<u8>> {
    let extent = vol.extent();
    let ty = vol.scalar_type();
    let log = vol.log().as_str().as_bytes();
    let data_len = vol.len() * bytes_per_voxel(ty);

    let mut ints = [0i32; V020_INTS];
    ints[0] = V020_VERSION;
    ints[5] = type_code(ty) as i32;
    for a in 0..3 {
        ints[6 + a] = to_i32(extent.lo()[a], "position")?;
        ints[9 + a] = to_i32(extent.dims()[a] as i64, "dimension")?;
        ints[12 + a] = to_i32(vol.offset()[a] as i64, "offset")?;
        // 完整图像即为自身.
        ints[15 + a] = ints[9 + a];
    }

    let mut out = Vec::with_capacity(V020_PRE_HEADER_LEN + V020_STRUCT_LEN + log.len() + data_len);
    let mut pre = [0u8; V020_PRE_HEADER_LEN];
    LittleEndian::write_i32_into(
        &[
            V020_PRE_HEADER_LEN as i32,
            V020_STRUCT_LEN as i32,
            to_i32(log.len() as i64, "log length")?,
            to_i32(data_len as i64, "data length")?,
            0,
        ],
        &mut pre,
    );
    out.extend_from_slice(&pre);

    let mut s = [0u8; V020_STRUCT_LEN];
    LittleEndian::write_i32_into(&ints, &mut s[..V020_EL_SIZE_AT]);
    for (a, e) in vol.spacing().iter().enumerate() {
        let p = V020_EL_SIZE_AT + 4 * a;
        s[p..p + 4].copy_from_slice(&f32_to_vax(*e as f32));
    }
    out.extend_from_slice(&s);
    out.extend_from_slice(log);
    encode_scalars(vol.scalars(), &mut out);
    Ok(out)
}

/// 读取 AIM 文件.
pub fn read(path: &Path) -> IplResult<Volume> {
    if !path.is_file() {
        return Err(IplError::InputNotFound(path.to_path_buf()));
    }
    decode(&fs::read(path)?)
}

/// 写出 AIM v020 文件. 已存在的文件被覆盖.
pub fn write(vol: &Volume, path: &Path) -> IplResult<()> {
    let bytes = encode(vol)?;
    fs::write(path, bytes)?;
    log::debug!("AIM written: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::scratch_dir;
    use ndarray::Array3;

    /// 手工拼出 v030 文件.
    fn v030_bytes(log: &str, pos: [i64; 3], dim: [i64; 3], data: &[i16]) -> Vec<u8> {
        let mut pre = vec![0u8; V030_PRE_HEADER_LEN];
        pre[..16].copy_from_slice(V030_MAGIC);
        LittleEndian::write_i64_into(
            &[
                V030_PRE_HEADER_LEN as i64,
                V030_STRUCT_LEN as i64,
                log.len() as i64,
                data.len() as i64 * 2,
                0,
            ],
            &mut pre[16..],
        );
        let mut longs = [0i64; V030_STRUCT_LEN / 8];
        longs[0] = 30;
        longs[6..9].copy_from_slice(&pos);
        longs[9..12].copy_from_slice(&dim);
        longs[12..15].copy_from_slice(&[1, 0, 0]);
        longs[27..30].copy_from_slice(&[82_000, 82_000, 41_000]);
        let mut s = vec![0u8; V030_STRUCT_LEN];
        LittleEndian::write_i64_into(&longs, &mut s);
        LittleEndian::write_u32(&mut s[40..44], TYPE_SHORT);
        LittleEndian::write_u32(&mut s[44..48], 0);

        let mut out = pre;
        out.extend(s);
        out.extend(log.as_bytes());
        let mut d = vec![0u8; data.len() * 2];
        LittleEndian::write_i16_into(data, &mut d);
        out.extend(d);
        out
    }

    #[test]
    fn test_vax_float() {
        assert_eq!(f32_to_vax(1.0), [0x80, 0x40, 0x00, 0x00]);
        assert_eq!(vax_to_f32([0x80, 0x40, 0x00, 0x00]), 1.0);
        assert_eq!(vax_to_f32([0, 0, 0, 0]), 0.0);
        for v in [0.082f32, 0.0607, 1.5, 123.25] {
            assert_eq!(vax_to_f32(f32_to_vax(v)), v);
        }
    }

    #[test]
    fn test_decode_v030() {
        let data: Vec<i16> = (0..24).map(|v| v * 10 - 100).collect();
        let bytes = v030_bytes("Mu_Scaling 4096\n\0\0", [10, 20, 30], [4, 3, 2], &data);
        let vol = decode(&bytes).unwrap();
        assert_eq!(vol.scalar_type(), ScalarType::I16);
        assert_eq!(vol.extent().lo(), [10, 20, 30]);
        assert_eq!(vol.dims(), [4, 3, 2]);
        assert_eq!(vol.offset(), [1, 0, 0]);
        assert!((vol.spacing()[0] - 0.082).abs() < 1e-12);
        assert!((vol.spacing()[2] - 0.041).abs() < 1e-12);
        assert_eq!(vol.log().as_str(), "Mu_Scaling 4096\n");
        // x 最快变化.
        let a = vol.data::<i16>().unwrap();
        assert_eq!(a[(0, 0, 1)], -90);
        assert_eq!(a[(0, 1, 0)], -60);
        assert_eq!(a[(1, 0, 0)], 20);
    }

    #[test]
    fn test_rejects_bad_input() {
        let data = vec![0i16; 24];
        let mut bytes = v030_bytes("", [0; 3], [4, 3, 2], &data);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(decode(&bytes), Err(IplError::UnsupportedFormat(_))));

        let mut bytes = v030_bytes("", [0; 3], [4, 3, 2], &data);
        LittleEndian::write_u32(&mut bytes[V030_PRE_HEADER_LEN + 40..], 0x0001_0002);
        assert!(matches!(decode(&bytes), Err(IplError::UnsupportedFormat(_))));

        assert!(matches!(decode(b"short"), Err(IplError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_rejects_huge_dimensions() {
        let data = vec![0i16; 8];
        let bytes = v030_bytes("", [0; 3], [1 << 40, 1 << 40, 2], &data);
        assert!(matches!(decode(&bytes), Err(IplError::UnsupportedFormat(_))));

        let bytes = v030_bytes("", [0; 3], [1 << 20, 1 << 20, 1], &data);
        assert!(matches!(decode(&bytes), Err(IplError::UnsupportedFormat(_))));

        let bytes = v030_bytes("", [i64::MAX - 1, 0, 0], [4, 1, 2], &data);
        assert!(matches!(decode(&bytes), Err(IplError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_v020_round_trip() {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| if (x + y + z) % 2 == 0 { 127i8 } else { 0 });
        let vol = Volume::from_array(data, [0.0607, 0.0607, 0.0607])
            .unwrap()
            .with_lo([-3, 5, 100])
            .unwrap()
            .with_offset([1, 1, 0])
            .with_log(ProcessingLog::new("Site 38\n"));

        let dir = scratch_dir("aim");
        let path = dir.join("seg.aim");
        write(&vol, &path).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back.scalar_type(), ScalarType::I8);
        assert_eq!(back.extent(), vol.extent());
        assert_eq!(back.offset(), [1, 1, 0]);
        assert_eq!(back.scalars(), vol.scalars());
        assert_eq!(back.log(), vol.log());
        assert!((back.spacing()[1] - 0.0607).abs() < 1e-6);

        let f = Volume::from_array(Array3::from_elem((1, 2, 2), -0.5f32), [1.0; 3]).unwrap();
        let back = decode(&encode(&f).unwrap()).unwrap();
        assert_eq!(back.scalars(), f.scalars());
        assert!(back.log().is_empty());
    }
}
